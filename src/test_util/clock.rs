use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::transport::{ticks, Clock, Tick};


/// A clock that only moves when told to. Clones share the same time, so a test can keep one
///  clone while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}
impl ManualClock {
    pub fn new(now: Tick) -> ManualClock {
        ManualClock {
            now: Arc::new(AtomicU64::new(now)),
        }
    }

    pub fn set(&self, now: Tick) {
        self.now.store(now, Ordering::Release);
    }

    pub fn advance(&self, duration: Duration) {
        self.now.fetch_add(ticks(duration), Ordering::AcqRel);
    }
}
impl Clock for ManualClock {
    fn now(&self) -> Tick {
        self.now.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_clones_share_time() {
        let clock = ManualClock::new(100);
        let other = clock.clone();

        clock.advance(Duration::from_millis(50));
        assert_eq!(other.now(), 150);

        other.set(7);
        assert_eq!(clock.now(), 7);
    }
}
