pub mod udp;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;


/// Monotonic time in milliseconds. All waiting in the engine is expressed as absolute deadlines
///  in ticks, compared against [Clock::now] on every poll.
pub type Tick = u64;

pub const TICKS_PER_SECOND: Tick = 1000;

pub fn ticks(duration: Duration) -> Tick {
    duration.as_millis().try_into().unwrap_or(Tick::MAX)
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SocketKind {
    Unicast,
    Multicast,
}

/// The datagram transport that the engine is layered on. Implementations must not block: the
///  engine calls them from its single poll routine.
pub trait Transport {
    fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()>;

    /// reads at most one datagram into `buf`, returning `None` if no data is available
    fn try_receive_datagram(&self, socket: SocketKind, buf: &mut [u8]) -> anyhow::Result<Option<(usize, SocketAddr)>>;
}

pub trait Clock {
    fn now(&self) -> Tick;
}

/// Ticks since the clock was created. This is based on tokio's clock so that it follows
///  paused / advanced time in tests.
pub struct MonotonicClock {
    reference_time: Instant,
}
impl MonotonicClock {
    pub fn new() -> MonotonicClock {
        MonotonicClock {
            reference_time: Instant::now(),
        }
    }
}
impl Default for MonotonicClock {
    fn default() -> Self {
        MonotonicClock::new()
    }
}
impl Clock for MonotonicClock {
    fn now(&self) -> Tick {
        ticks(Instant::now().duration_since(self.reference_time))
    }
}
