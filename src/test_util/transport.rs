use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;

use crate::pdu::codec;
use crate::pdu::message::Message;
use crate::transport::{SocketKind, Transport};


#[derive(Debug, Default)]
struct TransportState {
    sent: Vec<(SocketAddr, Vec<u8>)>,
    unicast_inbound: VecDeque<(SocketAddr, Vec<u8>)>,
    multicast_inbound: VecDeque<(SocketAddr, Vec<u8>)>,
    fail_sends: bool,
}

/// In-memory transport that records sent datagrams and delivers datagrams queued by the test.
///  Clones share their state.
#[derive(Debug, Clone, Default)]
pub struct TrackingMockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl TrackingMockTransport {
    pub fn new() -> TrackingMockTransport {
        TrackingMockTransport::default()
    }

    fn lock(&self) -> MutexGuard<'_, TransportState> {
        // a panicking test must not hide the state from other assertions
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push_inbound(&self, socket: SocketKind, from: SocketAddr, datagram: impl Into<Vec<u8>>) {
        let mut state = self.lock();
        let queue = match socket {
            SocketKind::Unicast => &mut state.unicast_inbound,
            SocketKind::Multicast => &mut state.multicast_inbound,
        };
        queue.push_back((from, datagram.into()));
    }

    /// encodes a message and queues it for the unicast socket
    pub fn push_inbound_message(&self, from: SocketAddr, message: &Message) {
        let encoded = codec::encode(message).expect("test message can not be encoded");
        self.push_inbound(SocketKind::Unicast, from, encoded.to_vec());
    }

    pub fn set_fail_sends(&self, fail_sends: bool) {
        self.lock().fail_sends = fail_sends;
    }

    /// removes and returns all datagrams sent so far
    pub fn take_sent_datagrams(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut self.lock().sent)
    }

    /// removes and returns all messages sent so far, decoded
    pub fn take_sent_messages(&self) -> Vec<(SocketAddr, Message)> {
        self.take_sent_datagrams().into_iter()
            .map(|(to, buf)| (to, codec::decode(&buf).expect("engine sent an undecodable datagram")))
            .collect()
    }

    pub fn assert_message_sent(&self, to: SocketAddr) -> Message {
        let mut state = self.lock();
        if state.sent.is_empty() {
            panic!("no message was sent");
        }
        let (actual_to, buf) = state.sent.remove(0);
        assert_eq!(actual_to, to);
        codec::decode(&buf).expect("engine sent an undecodable datagram")
    }

    pub fn assert_no_remaining_messages(&self) {
        let state = self.lock();
        assert!(state.sent.is_empty(), "unexpected messages sent: {:?}", state.sent);
    }
}

impl Transport for TrackingMockTransport {
    fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        let mut state = self.lock();
        if state.fail_sends {
            return Err(anyhow!("simulated send failure"));
        }
        state.sent.push((to, buf.to_vec()));
        Ok(())
    }

    fn try_receive_datagram(&self, socket: SocketKind, buf: &mut [u8]) -> anyhow::Result<Option<(usize, SocketAddr)>> {
        let mut state = self.lock();
        let queue = match socket {
            SocketKind::Unicast => &mut state.unicast_inbound,
            SocketKind::Multicast => &mut state.multicast_inbound,
        };
        match queue.pop_front() {
            None => Ok(None),
            Some((from, datagram)) => {
                // like a UDP socket, truncate datagrams that don't fit into the buffer
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(Some((len, from)))
            }
        }
    }
}
