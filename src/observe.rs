use tracing::{debug, trace};

use crate::error::{CoapError, CoapResult};
use crate::pdu::code::StackResult;
use crate::transaction::{Method, Transaction, TransactionHandle, TransactionTable};
use crate::transport::{Tick, TICKS_PER_SECOND};
use crate::util::random::Random;


#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ObserveState {
    Idle,
    Subscribed,
    Cancelled,
}

/// Liveness tracking for a presence subscription. The wake times split the announced TTL into
///  windows; if no presence update arrives before the current level's wake time, the application
///  should query the presence source.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PresenceState {
    pub ttl_seconds: u32,
    pub level: usize,
    pub wake_times: Vec<Tick>,
}
impl PresenceState {
    pub fn current_wake_time(&self) -> Option<Tick> {
        self.wake_times.get(self.level).copied()
    }
}

/// What the router learned from an incoming notification
#[derive(Debug, Clone, Copy)]
pub struct Notification {
    pub sequence_number: u32,
    pub max_age: u32,
    pub is_presence: bool,
    /// the result mapped from the wire code
    pub result: StackResult,
}


pub struct ObserveTracker {
    presence_timeout_percentages: Vec<u8>,
}

impl ObserveTracker {
    pub fn new(presence_timeout_percentages: Vec<u8>) -> ObserveTracker {
        ObserveTracker {
            presence_timeout_percentages,
        }
    }

    /// Applies a notification's sequence number to the transaction's observe state. Returns the
    ///  result to deliver to the application, or [CoapError::InvalidObserveSequence] for a stale
    ///  notification that must be dropped.
    pub fn on_notification(&self, transaction: &mut Transaction, notification: &Notification, now: Tick, random: &mut dyn Random) -> CoapResult<StackResult> {
        let stored = transaction.sequence_number;
        let received = notification.sequence_number;

        let is_stale = match transaction.method {
            Method::Observe => received <= stored,
            Method::Presence => received < stored,
            _ => false,
        };
        if is_stale {
            debug!(token = ?transaction.token, received, stored, "stale notification");
            return Err(CoapError::InvalidObserveSequence { received, stored });
        }

        let mut result = notification.result;
        if notification.is_presence && received == stored {
            result = StackResult::PresenceNoUpdate;
        }
        if received > stored {
            transaction.sequence_number = received;
        }
        transaction.observe_state = ObserveState::Subscribed;

        if notification.is_presence && transaction.method == Method::Presence {
            if notification.max_age == 0 {
                debug!(token = ?transaction.token, "presence stopped by its source");
                transaction.presence = None;
                transaction.observe_state = ObserveState::Idle;
                result = StackResult::PresenceStopped;
            }
            else {
                let wake_times = self.schedule_presence_windows(notification.max_age, now, random);
                trace!(token = ?transaction.token, ttl = notification.max_age, ?wake_times, "rescheduled presence windows");

                let presence = transaction.presence.get_or_insert_with(PresenceState::default);
                presence.ttl_seconds = notification.max_age;
                presence.level = 0;
                presence.wake_times = wake_times;
            }
        }

        Ok(result)
    }

    /// One wake time per pair of neighbouring percentages, picked uniformly at random strictly
    ///  inside the window between them.
    pub fn schedule_presence_windows(&self, ttl_seconds: u32, now: Tick, random: &mut dyn Random) -> Vec<Tick> {
        let ttl = ttl_seconds as Tick * TICKS_PER_SECOND;

        self.presence_timeout_percentages.windows(2)
            .map(|w| {
                let lower = now + w[0] as Tick * ttl / 100;
                let upper = now + w[1] as Tick * ttl / 100;
                if upper > lower + 1 {
                    random.gen_u64_range(lower + 1..upper)
                }
                else {
                    upper
                }
            })
            .collect()
    }

    pub fn cancel(&self, transaction: &mut Transaction) {
        debug!(token = ?transaction.token, handle = ?transaction.handle, "cancelling subscription");
        transaction.observe_state = ObserveState::Cancelled;
        transaction.presence = None;
    }

    /// Returns the presence subscriptions whose current wake time has elapsed, advancing each of
    ///  them to the next level.
    pub fn take_due_wakeups(&self, transactions: &mut TransactionTable, now: Tick) -> Vec<TransactionHandle> {
        let mut result = Vec::new();
        for transaction in transactions.iter_mut() {
            if let Some(presence) = &mut transaction.presence {
                if matches!(presence.current_wake_time(), Some(t) if t <= now) {
                    presence.level += 1;
                    trace!(handle = ?transaction.handle, level = presence.level, "presence wake time elapsed");
                    result.push(transaction.handle);
                }
            }
        }
        result
    }
}
