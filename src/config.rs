use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use anyhow::bail;

use crate::pdu::message::UriLimits;
use crate::token::MAX_TOKEN_LENGTH;


pub const DEFAULT_PORT: u16 = 5683;

/// the well-known 'All CoAP Nodes' multicast group for IPV4
pub const ALL_COAP_NODES_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 187);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EngineMode {
    Client,
    Server,
    ClientServer,
}

#[derive(Debug, Clone)]
pub struct CoapConfig {
    /// The address that the unicast socket is bound to
    pub self_addr: SocketAddr,
    /// The multicast group (and port) joined for receiving presence announcements and
    ///  multicast discovery requests. `None` disables the multicast socket.
    pub multicast_addr: Option<SocketAddrV4>,

    /// A node in [EngineMode::Client] silently ignores incoming requests
    pub mode: EngineMode,

    pub presence_enabled: bool,
    /// Path that presence announcements are sent to. Responses carrying this path are treated
    ///  as presence updates rather than regular notifications.
    pub presence_uri: String,
    /// Ascending percentages of a presence TTL. Every pair of neighbours defines a sub-interval
    ///  in which one wake time is scheduled, so `n` percentages give `n-1` wake times.
    pub presence_timeout_percentages: Vec<u8>,

    pub token_length: usize,

    /// Initial retransmission timeout for confirmable messages
    pub ack_timeout: Duration,
    /// >= 1.0: the initial timeout is randomized in `[ack_timeout, ack_timeout * factor)`
    pub ack_random_factor: f64,
    /// number of retransmissions before a confirmable message is given up
    pub max_retransmit: u32,
    /// growth of the retransmission interval per retry in eighths, i.e. 16 doubles the interval
    pub backoff_factor_eighths: u32,

    /// how long the response to a received confirmable request is remembered for answering
    ///  retransmissions of that request
    pub exchange_lifetime: Duration,

    pub max_uri_length: usize,
    pub max_query_length: usize,
    pub max_datagram_size: usize,

    /// interval at which the driver polls the engine
    pub poll_interval: Duration,
}

impl CoapConfig {
    pub fn new(self_addr: SocketAddr) -> CoapConfig {
        CoapConfig {
            self_addr,
            multicast_addr: Some(SocketAddrV4::new(ALL_COAP_NODES_V4, DEFAULT_PORT)),
            mode: EngineMode::ClientServer,
            presence_enabled: true,
            presence_uri: "/oc/presence".to_string(),
            presence_timeout_percentages: vec![50, 75, 85, 95, 100],
            token_length: MAX_TOKEN_LENGTH,
            ack_timeout: Duration::from_secs(2),
            ack_random_factor: 1.5,
            max_retransmit: 4,
            backoff_factor_eighths: 16,
            exchange_lifetime: Duration::from_secs(247),
            max_uri_length: 256,
            max_query_length: 256,
            max_datagram_size: 1152,
            poll_interval: Duration::from_millis(10),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.token_length == 0 {
            bail!("token length must be at least 1 byte, responses are correlated by token");
        }
        if self.token_length > MAX_TOKEN_LENGTH {
            bail!("token length must be at most {} bytes", MAX_TOKEN_LENGTH);
        }
        if self.ack_random_factor < 1.0 {
            bail!("ack random factor must be at least 1.0");
        }
        if self.backoff_factor_eighths < 8 {
            bail!("backoff factor must be at least 8 eighths, otherwise retransmission intervals would shrink");
        }
        if self.ack_timeout.is_zero() {
            bail!("ack timeout must be positive");
        }
        if self.presence_timeout_percentages.len() < 2 {
            bail!("at least two presence timeout percentages are required");
        }
        if self.presence_timeout_percentages.windows(2).any(|w| w[0] >= w[1]) {
            bail!("presence timeout percentages must be strictly ascending");
        }
        if self.presence_timeout_percentages.iter().any(|&p| p > 100) {
            bail!("presence timeout percentages must not exceed 100");
        }
        if self.max_datagram_size < 4 {
            bail!("datagram size is too small");
        }
        Ok(())
    }

    pub fn uri_limits(&self) -> UriLimits {
        UriLimits {
            max_uri_length: self.max_uri_length,
            max_query_length: self.max_query_length,
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use super::*;

    fn new_config() -> CoapConfig {
        CoapConfig::new(SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
    }

    #[test]
    fn test_default_is_valid() {
        new_config().validate().unwrap();
    }

    #[rstest]
    #[case::zero_token_length(|c: &mut CoapConfig| c.token_length = 0)]
    #[case::token_too_long(|c: &mut CoapConfig| c.token_length = 9)]
    #[case::random_factor(|c: &mut CoapConfig| c.ack_random_factor = 0.5)]
    #[case::shrinking_backoff(|c: &mut CoapConfig| c.backoff_factor_eighths = 7)]
    #[case::zero_ack_timeout(|c: &mut CoapConfig| c.ack_timeout = Duration::ZERO)]
    #[case::single_percentage(|c: &mut CoapConfig| c.presence_timeout_percentages = vec![100])]
    #[case::unordered_percentages(|c: &mut CoapConfig| c.presence_timeout_percentages = vec![50, 50, 100])]
    #[case::percentage_over_100(|c: &mut CoapConfig| c.presence_timeout_percentages = vec![50, 110])]
    fn test_validate_rejects(#[case] modify: fn(&mut CoapConfig)) {
        let mut config = new_config();
        modify(&mut config);
        assert!(config.validate().is_err());
    }
}
