//! Reliable delivery of confirmable messages: retransmission with exponential backoff until
//!  an ACK or RST arrives, and the duplicate cache for confirmable requests received from peers.

use std::net::SocketAddr;

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::config::CoapConfig;
use crate::error::CoapResult;
use crate::pdu::message::Message;
use crate::token::Token;
use crate::transport::{ticks, Tick};
use crate::util::random::Random;


/// Hands out message ids for outgoing messages, wrapping around at 2^16
pub struct MessageIdGenerator {
    next: u16,
}
impl MessageIdGenerator {
    /// starts at a random id, so that ids don't collide with those of a previous incarnation
    pub fn new(random: &mut dyn Random) -> MessageIdGenerator {
        MessageIdGenerator {
            next: random.gen_u64_range(0..0x1_0000) as u16,
        }
    }

    pub fn next_id(&mut self) -> u16 {
        let result = self.next;
        self.next = self.next.wrapping_add(1);
        result
    }
}


/// Timeouts between transmissions of a confirmable message
pub struct RetransmitBackoff {
    config_ack_timeout: Tick,
    config_random_factor: f64,
    config_factor_eighths: u64,
}
impl RetransmitBackoff {
    pub fn new(config: &CoapConfig) -> RetransmitBackoff {
        let result = RetransmitBackoff {
            config_ack_timeout: ticks(config.ack_timeout),
            config_random_factor: config.ack_random_factor,
            config_factor_eighths: config.backoff_factor_eighths as u64,
        };

        assert!(result.config_factor_eighths >= 8);
        result
    }

    /// randomized in `[ack_timeout, ack_timeout * random_factor)`
    pub fn initial_timeout(&self, random: &mut dyn Random) -> Tick {
        if self.config_random_factor <= 1.0 {
            return self.config_ack_timeout;
        }
        let factor = random.gen_f64_range(1.0..self.config_random_factor);
        (self.config_ack_timeout as f64 * factor) as Tick
    }

    pub fn next_timeout(&self, timeout: Tick) -> Tick {
        timeout.saturating_mul(self.config_factor_eighths) >> 3
    }
}


#[derive(Debug, Clone)]
pub struct RetransmissionEntry {
    pub message: Message,
    pub encoded: Bytes,
    pub destination: SocketAddr,
    pub deadline: Tick,
    pub timeout: Tick,
    pub retry_count: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub enum RetransmitAction {
    Resend {
        destination: SocketAddr,
        message_id: u16,
        encoded: Bytes,
        retry_count: u32,
    },
    /// the retry budget is exhausted; the entry was removed from the queue
    Failed(RetransmissionEntry),
}

/// Confirmable messages that were sent but not yet acknowledged, keyed by destination and
///  message id
pub struct ReliabilityQueue {
    entries: FxHashMap<(SocketAddr, u16), RetransmissionEntry>,
    backoff: RetransmitBackoff,
    config_max_retransmit: u32,
}

impl ReliabilityQueue {
    pub fn new(config: &CoapConfig) -> ReliabilityQueue {
        ReliabilityQueue {
            entries: FxHashMap::default(),
            backoff: RetransmitBackoff::new(config),
            config_max_retransmit: config.max_retransmit,
        }
    }

    /// Registers a confirmable message after its first transmission
    pub fn schedule(&mut self, message: Message, encoded: Bytes, destination: SocketAddr, now: Tick, random: &mut dyn Random) -> CoapResult<()> {
        self.entries.try_reserve(1)?;

        let timeout = self.backoff.initial_timeout(random);
        let key = (destination, message.message_id);
        trace!(?destination, message_id = message.message_id, timeout, "scheduling confirmable message");

        let entry = RetransmissionEntry {
            message,
            encoded,
            destination,
            deadline: now + timeout,
            timeout,
            retry_count: 0,
            max_retries: self.config_max_retransmit,
        };
        if self.entries.insert(key, entry).is_some() {
            warn!(?destination, message_id = key.1, "message id was reused while still pending - replacing the old message");
        }
        Ok(())
    }

    /// Removes the entry matching an ACK or RST. Returns `None` for duplicate or unexpected
    ///  ACKs / RSTs, which are to be ignored.
    pub fn acknowledge(&mut self, source: SocketAddr, message_id: u16) -> Option<RetransmissionEntry> {
        let result = self.entries.remove(&(source, message_id));
        if result.is_none() {
            debug!(?source, message_id, "no pending message for ACK / RST - ignoring");
        }
        result
    }

    /// removes all pending messages with a given token to a given destination, returning the
    ///  number of removed messages
    pub fn cancel_all(&mut self, destination: SocketAddr, token: &Token) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(addr, _), entry| !(addr == &destination && &entry.message.token == token));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(?destination, ?token, removed, "cancelled pending messages");
        }
        removed
    }

    /// Collects everything that is due at `now`, ordered by deadline. Entries that still have
    ///  retries left are rescheduled with a grown timeout, the others are removed.
    pub fn poll_due(&mut self, now: Tick) -> Vec<RetransmitAction> {
        let mut due = self.entries.iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(key, e)| (e.deadline, *key))
            .collect::<Vec<_>>();
        due.sort_by_key(|(deadline, (addr, id))| (*deadline, *id, *addr));

        let mut result = Vec::with_capacity(due.len());
        for (_, key) in due {
            let Some(entry) = self.entries.get_mut(&key) else { continue; };

            if entry.retry_count >= entry.max_retries {
                if let Some(entry) = self.entries.remove(&key) {
                    result.push(RetransmitAction::Failed(entry));
                }
                continue;
            }

            entry.retry_count += 1;
            entry.timeout = self.backoff.next_timeout(entry.timeout);
            entry.deadline = now + entry.timeout;
            trace!(destination = ?entry.destination, message_id = key.1, retry = entry.retry_count, next_deadline = entry.deadline, "retransmitting");

            result.push(RetransmitAction::Resend {
                destination: entry.destination,
                message_id: key.1,
                encoded: entry.encoded.clone(),
                retry_count: entry.retry_count,
            });
        }
        result
    }

    pub fn next_deadline(&self) -> Option<Tick> {
        self.entries.values().map(|e| e.deadline).min()
    }

    pub fn contains(&self, destination: SocketAddr, message_id: u16) -> bool {
        self.entries.contains_key(&(destination, message_id))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}


#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CachedReply {
    Response(Bytes),
    /// the request was handled without sending a response
    NoResponse,
}

/// Replies to recently received confirmable requests, so that retransmitted requests are not
///  handled twice
pub struct DuplicateCache {
    entries: FxHashMap<(SocketAddr, u16), (CachedReply, Tick)>,
    config_exchange_lifetime: Tick,
}

impl DuplicateCache {
    pub fn new(config: &CoapConfig) -> DuplicateCache {
        DuplicateCache {
            entries: FxHashMap::default(),
            config_exchange_lifetime: ticks(config.exchange_lifetime),
        }
    }

    pub fn insert(&mut self, source: SocketAddr, message_id: u16, reply: CachedReply, now: Tick) {
        self.entries.insert((source, message_id), (reply, now + self.config_exchange_lifetime));
    }

    pub fn lookup(&self, source: SocketAddr, message_id: u16) -> Option<&CachedReply> {
        self.entries.get(&(source, message_id))
            .map(|(reply, _)| reply)
    }

    pub fn expire(&mut self, now: Tick) {
        self.entries.retain(|_, (_, expiry)| *expiry > now);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use rstest::rstest;

    use crate::pdu::code::Code;
    use crate::pdu::message::MessageType;
    use crate::util::random::MockRandom;
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 2], port))
    }

    fn config() -> CoapConfig {
        let mut config = CoapConfig::new(addr(5683));
        config.ack_timeout = Duration::from_millis(1000);
        config.ack_random_factor = 1.5;
        config.max_retransmit = 2;
        config.backoff_factor_eighths = 16;
        config
    }

    /// always picks the lower end of the randomization interval
    fn min_random() -> MockRandom {
        let mut random = MockRandom::new();
        random.expect_gen_f64_range().returning(|r| r.start);
        random
    }

    fn message(id: u16, token: u8) -> Message {
        Message::new(MessageType::Confirmable, Code::GET, id, Token::new(&[token]).unwrap())
    }

    fn schedule(queue: &mut ReliabilityQueue, destination: SocketAddr, id: u16, token: u8, now: Tick) {
        queue.schedule(message(id, token), Bytes::from_static(b"x"), destination, now, &mut min_random()).unwrap();
    }

    fn resent_ids(actions: &[RetransmitAction]) -> Vec<u16> {
        actions.iter()
            .filter_map(|a| match a {
                RetransmitAction::Resend { message_id, .. } => Some(*message_id),
                RetransmitAction::Failed(_) => None,
            })
            .collect()
    }

    fn failed_ids(actions: &[RetransmitAction]) -> Vec<u16> {
        actions.iter()
            .filter_map(|a| match a {
                RetransmitAction::Failed(e) => Some(e.message.message_id),
                RetransmitAction::Resend { .. } => None,
            })
            .collect()
    }

    #[rstest]
    #[case::lower_end(1.0, 2000)]
    #[case::randomized(1.25, 2500)]
    fn test_initial_timeout(#[case] drawn: f64, #[case] expected: Tick) {
        let mut config = config();
        config.ack_timeout = Duration::from_secs(2);
        let backoff = RetransmitBackoff::new(&config);

        let mut random = MockRandom::new();
        random.expect_gen_f64_range()
            .withf(|r| r.start == 1.0 && r.end == 1.5)
            .return_const(drawn);
        assert_eq!(backoff.initial_timeout(&mut random), expected);
    }

    #[test]
    fn test_initial_timeout_without_randomization() {
        let mut config = config();
        config.ack_random_factor = 1.0;
        assert_eq!(RetransmitBackoff::new(&config).initial_timeout(&mut MockRandom::new()), 1000);
    }

    #[rstest]
    #[case::double(16, 1000, 2000)]
    #[case::one_and_a_half(12, 1000, 1500)]
    #[case::constant(8, 1000, 1000)]
    #[case::saturating(16, Tick::MAX, Tick::MAX >> 3)]
    fn test_next_timeout(#[case] eighths: u32, #[case] timeout: Tick, #[case] expected: Tick) {
        let mut config = config();
        config.backoff_factor_eighths = eighths;
        assert_eq!(RetransmitBackoff::new(&config).next_timeout(timeout), expected);
    }

    #[test]
    fn test_retransmit_until_failure() {
        let mut queue = ReliabilityQueue::new(&config());
        schedule(&mut queue, addr(1), 17, 1, 0);

        assert!(queue.poll_due(999).is_empty());

        let actions = queue.poll_due(1000);
        assert_eq!(resent_ids(&actions), vec![17]);
        // second timeout doubles to 2000
        assert!(queue.poll_due(2999).is_empty());

        let actions = queue.poll_due(3000);
        assert_eq!(resent_ids(&actions), vec![17]);
        assert!(queue.poll_due(6999).is_empty());

        let actions = queue.poll_due(7000);
        assert_eq!(failed_ids(&actions), vec![17]);
        assert!(queue.is_empty());

        // failure is reported exactly once
        assert!(queue.poll_due(1_000_000).is_empty());
    }

    #[test]
    fn test_retry_count_and_payload_are_kept() {
        let mut queue = ReliabilityQueue::new(&config());
        schedule(&mut queue, addr(1), 17, 1, 0);

        match &queue.poll_due(1000)[..] {
            [RetransmitAction::Resend { destination, message_id, encoded, retry_count }] => {
                assert_eq!(*destination, addr(1));
                assert_eq!(*message_id, 17);
                assert_eq!(encoded.as_ref(), b"x");
                assert_eq!(*retry_count, 1);
            }
            other => panic!("unexpected actions {:?}", other),
        }
    }

    #[test]
    fn test_late_poll_does_not_burst() {
        let mut queue = ReliabilityQueue::new(&config());
        schedule(&mut queue, addr(1), 17, 1, 0);

        // a single poll long after several deadlines resends only once
        assert_eq!(resent_ids(&queue.poll_due(100_000)), vec![17]);
        assert!(queue.poll_due(100_001).is_empty());
    }

    #[test]
    fn test_due_entries_are_ordered_by_deadline() {
        let mut queue = ReliabilityQueue::new(&config());
        schedule(&mut queue, addr(1), 3, 1, 200);
        schedule(&mut queue, addr(1), 1, 2, 100);
        schedule(&mut queue, addr(2), 2, 3, 0);

        assert_eq!(resent_ids(&queue.poll_due(5000)), vec![2, 1, 3]);
    }

    #[test]
    fn test_acknowledge() {
        let mut queue = ReliabilityQueue::new(&config());
        schedule(&mut queue, addr(1), 17, 1, 0);

        // same id from a different peer does not match
        assert!(queue.acknowledge(addr(2), 17).is_none());
        assert!(queue.contains(addr(1), 17));

        let entry = queue.acknowledge(addr(1), 17).unwrap();
        assert_eq!(entry.message.message_id, 17);
        assert!(queue.is_empty());

        // duplicate ACK is a no-op
        assert!(queue.acknowledge(addr(1), 17).is_none());
        assert!(queue.poll_due(1_000_000).is_empty());
    }

    #[test]
    fn test_cancel_all() {
        let mut queue = ReliabilityQueue::new(&config());
        schedule(&mut queue, addr(1), 1, 7, 0);
        schedule(&mut queue, addr(1), 2, 7, 0);
        schedule(&mut queue, addr(1), 3, 8, 0);
        schedule(&mut queue, addr(2), 4, 7, 0);

        assert_eq!(queue.cancel_all(addr(1), &Token::new(&[7]).unwrap()), 2);
        assert_eq!(queue.len(), 2);
        assert!(queue.contains(addr(1), 3));
        assert!(queue.contains(addr(2), 4));
    }

    #[test]
    fn test_next_deadline() {
        let mut queue = ReliabilityQueue::new(&config());
        assert_eq!(queue.next_deadline(), None);
        schedule(&mut queue, addr(1), 1, 1, 500);
        schedule(&mut queue, addr(1), 2, 2, 100);
        assert_eq!(queue.next_deadline(), Some(1100));
    }

    #[test]
    fn test_message_ids_wrap() {
        let mut random = MockRandom::new();
        random.expect_gen_u64_range().return_const(0xffffu64);
        let mut ids = MessageIdGenerator::new(&mut random);
        assert_eq!(ids.next_id(), 0xffff);
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);
    }

    #[test]
    fn test_duplicate_cache() {
        let mut config = config();
        config.exchange_lifetime = Duration::from_secs(10);
        let mut cache = DuplicateCache::new(&config);

        cache.insert(addr(1), 5, CachedReply::Response(Bytes::from_static(b"r")), 1000);
        cache.insert(addr(1), 6, CachedReply::NoResponse, 2000);

        assert_eq!(cache.lookup(addr(1), 5), Some(&CachedReply::Response(Bytes::from_static(b"r"))));
        assert_eq!(cache.lookup(addr(1), 6), Some(&CachedReply::NoResponse));
        assert_eq!(cache.lookup(addr(2), 5), None);

        cache.expire(10_999);
        assert_eq!(cache.len(), 2);
        cache.expire(11_000);
        assert!(cache.lookup(addr(1), 5).is_none());
        assert_eq!(cache.len(), 1);
        cache.expire(12_000);
        assert!(cache.is_empty());
    }
}
