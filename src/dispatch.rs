use std::net::SocketAddr;

use tracing::{debug, trace, warn};

use crate::config::{CoapConfig, EngineMode};
use crate::engine::EngineCore;
use crate::handler::{CallbackAction, ClientResponse, EntityRequest, EntityResponse, ObserveOutcome, QualityOfService};
use crate::observe::Notification;
use crate::pdu::code::{RequestMethod, StackResult};
use crate::pdu::codec;
use crate::pdu::message::{Message, MessageType};
use crate::pdu::option::{CoapOption, OptionNumber, MEDIA_TYPE_APPLICATION_JSON};
use crate::reliability::CachedReply;
use crate::token::Token;
use crate::transport::{Tick, Transport};
use crate::uri::CoapUri;


/// Handling of ACK and RST messages, i.e. the reliability layer's view of a message. Returns
///  `false` if the message matched no queued confirmable message, e.g. for a duplicate ACK.
pub trait AckResetHandling {
    fn handle_ack_or_reset(&mut self, msg: &Message, source: SocketAddr) -> bool;
}

/// Handling of responses and notifications on the client side
pub trait ResponseHandling {
    fn handle_response(&mut self, msg: &Message, source: SocketAddr);
}

/// Handling of requests on the server side
pub trait RequestHandling {
    fn handle_request(&mut self, msg: &Message, source: SocketAddr);
}


/// Routes a single received datagram. A router is created per datagram, borrowing the engine's
///  state for the duration of the dispatch.
pub(crate) struct DispatchRouter<'a> {
    pub(crate) config: &'a CoapConfig,
    pub(crate) transport: &'a dyn Transport,
    pub(crate) core: &'a mut EngineCore,
    pub(crate) now: Tick,
}

impl DispatchRouter<'_> {
    pub(crate) fn dispatch(&mut self, datagram: &[u8], source: SocketAddr) {
        let msg = match codec::decode(datagram) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(?source, "dropping datagram that could not be decoded: {}", e);
                return;
            }
        };
        trace!(?source, message_type = ?msg.message_type, code = ?msg.code, message_id = msg.message_id, token = ?msg.token, "received message");

        match msg.message_type {
            MessageType::Acknowledgement => {
                let acknowledged = self.handle_ack_or_reset(&msg, source);
                if acknowledged && msg.code.is_response() {
                    // piggybacked response
                    self.handle_response(&msg, source);
                }
            }
            MessageType::Reset => {
                self.handle_ack_or_reset(&msg, source);
            }
            MessageType::Confirmable | MessageType::NonConfirmable => {
                if msg.code.is_empty() {
                    if msg.is_confirmable() {
                        debug!(?source, message_id = msg.message_id, "answering ping with RST");
                        self.send_reply(source, Message::reset(msg.message_id));
                    }
                }
                else if msg.code.is_request() {
                    self.handle_request(&msg, source);
                }
                else if msg.code.is_response() {
                    self.handle_response(&msg, source);
                }
                else {
                    warn!(?source, code = ?msg.code, "dropping message with unsupported code");
                }
            }
        }
    }

    /// sends a message that is not subject to retransmission, logging failures
    fn send_reply(&mut self, destination: SocketAddr, msg: Message) {
        if let Err(e) = self.core.send_message(self.transport, self.config, destination, msg, self.now) {
            warn!(?destination, "failed to send reply: {}", e);
        }
    }

    fn notify_observer_status(&mut self, token: Token, still_interested: bool) {
        if let Some(listener) = self.core.observer_listener.as_mut() {
            listener.on_observer_status_changed(token, still_interested);
        }
    }
}

impl AckResetHandling for DispatchRouter<'_> {
    fn handle_ack_or_reset(&mut self, msg: &Message, source: SocketAddr) -> bool {
        let Some(entry) = self.core.reliability.acknowledge(source, msg.message_id) else {
            trace!(?source, message_id = msg.message_id, "ACK or RST without queued message - ignoring");
            return false;
        };
        let token = entry.message.token;
        // the listener only hears about remote observers, not about our own registrations
        let is_client_message = self.core.transactions.contains_token(&token);

        match msg.message_type {
            MessageType::Reset => {
                debug!(?source, message_id = msg.message_id, ?token, "received RST");
                self.core.reliability.cancel_all(source, &token);

                let core = &mut *self.core;
                if let Some(handle) = core.transactions.find_by_token(&token).map(|t| t.handle) {
                    if let Some(transaction) = core.transactions.find_by_handle_mut(handle) {
                        core.tracker.cancel(transaction);
                    }
                    core.transactions.delete(handle);
                }
                if !is_client_message {
                    self.notify_observer_status(token, false);
                }
            }
            _ => {
                trace!(?source, message_id = msg.message_id, "received ACK");
                if !is_client_message && matches!(entry.message.observe(), Ok(Some(_))) {
                    self.notify_observer_status(token, true);
                }
            }
        }
        true
    }
}

impl ResponseHandling for DispatchRouter<'_> {
    fn handle_response(&mut self, msg: &Message, source: SocketAddr) {
        let limits = self.config.uri_limits();
        let extracted = msg.uri_path(&limits)
            .and_then(|uri| Ok((uri, msg.observe()?, msg.max_age()?)));
        let (uri, observe, max_age) = match extracted {
            Ok(x) => x,
            Err(e) => {
                warn!(?source, "dropping response: {}", e);
                return;
            }
        };
        let sequence_number = observe.unwrap_or(0);
        let is_presence = self.config.presence_enabled && uri == self.config.presence_uri;

        let core = &mut *self.core;
        let matched = core.transactions.find_by_token(&msg.token)
            .or_else(|| core.transactions.find_by_uri(&CoapUri::resource_uri(source, &uri)))
            .map(|t| (t.handle, t.method));

        let Some((handle, method)) = matched else {
            if is_presence {
                debug!(?source, "presence update without subscription - ignoring");
            }
            else if sequence_number != 0 {
                debug!(?source, token = ?msg.token, "notification without subscription - sending RST");
                self.send_reply(source, Message::reset(msg.message_id));
            }
            else {
                debug!(?source, token = ?msg.token, "response without transaction - ignoring");
            }
            return;
        };

        if msg.is_confirmable() && !is_presence {
            self.send_reply(source, Message::empty_ack(msg.message_id));
        }

        let core = &mut *self.core;
        let Some(transaction) = core.transactions.find_by_handle_mut(handle) else {
            return;
        };

        let mut result = StackResult::from_code(msg.code);
        if (sequence_number != 0 || is_presence) && method.is_observing() {
            let notification = Notification {
                sequence_number,
                max_age,
                is_presence,
                result,
            };
            match core.tracker.on_notification(transaction, &notification, self.now, core.random.as_mut()) {
                Ok(r) => result = r,
                Err(e) => {
                    debug!(?source, ?handle, "dropping notification: {}", e);
                    return;
                }
            }
        }

        let response = ClientResponse {
            handle,
            result,
            source,
            sequence_number,
            max_age,
            payload: msg.payload.clone(),
        };
        if transaction.invoke_callback(&response) == CallbackAction::DeleteTransaction {
            core.transactions.delete(handle);
        }
    }
}

impl RequestHandling for DispatchRouter<'_> {
    fn handle_request(&mut self, msg: &Message, source: SocketAddr) {
        if self.config.mode == EngineMode::Client {
            debug!(?source, "ignoring request in client mode");
            return;
        }

        if msg.is_confirmable() {
            match self.core.duplicates.lookup(source, msg.message_id) {
                Some(CachedReply::Response(encoded)) => {
                    debug!(?source, message_id = msg.message_id, "duplicate request - resending cached response");
                    if let Err(e) = self.transport.send_datagram(source, encoded) {
                        warn!(?source, "failed to resend cached response: {}", e);
                    }
                    return;
                }
                Some(CachedReply::NoResponse) => {
                    debug!(?source, message_id = msg.message_id, "duplicate request - ignoring");
                    return;
                }
                None => {}
            }
        }

        let limits = self.config.uri_limits();
        let extracted = msg.uri_path(&limits)
            .and_then(|uri| Ok((uri, msg.uri_query(&limits)?, msg.observe()?)));
        let (uri, query, observe) = match extracted {
            Ok(x) => x,
            Err(e) => {
                warn!(?source, "dropping request: {}", e);
                return;
            }
        };

        let response = match (RequestMethod::from_code(msg.code), self.core.request_handler.as_mut()) {
            (None, _) => EntityResponse::new(StackResult::InvalidMethod, Vec::new()),
            (_, None) => EntityResponse::new(StackResult::NoResource, Vec::new()),
            (Some(method), Some(handler)) => {
                let request = EntityRequest {
                    method,
                    qos: if msg.is_confirmable() { QualityOfService::Confirmable } else { QualityOfService::NonConfirmable },
                    uri,
                    query,
                    payload: msg.payload.clone(),
                    observe,
                    source,
                    token: msg.token,
                };
                handler.on_request(&request)
            }
        };

        if response.result == StackResult::PresenceDoNotHandle {
            debug!(?source, "request handler suppressed the response");
            if msg.is_confirmable() {
                self.core.duplicates.insert(source, msg.message_id, CachedReply::NoResponse, self.now);
            }
            return;
        }

        let (message_type, message_id) = if msg.is_confirmable() {
            (MessageType::Acknowledgement, msg.message_id)
        }
        else {
            (MessageType::NonConfirmable, self.core.message_ids.next_id())
        };
        let mut reply = Message::new(message_type, response.result.to_code(), message_id, msg.token);
        if let ObserveOutcome::Registered { sequence_number } = response.observe {
            reply.set_observe(sequence_number);
        }
        if !response.payload.is_empty() {
            reply.options.insert(CoapOption::uint(OptionNumber::CONTENT_FORMAT, MEDIA_TYPE_APPLICATION_JSON));
            reply.payload = response.payload;
        }

        let encoded = match codec::encode(&reply) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(?source, "failed to encode response: {}", e);
                return;
            }
        };
        trace!(?source, code = ?reply.code, message_id, "sending response");
        if let Err(e) = self.transport.send_datagram(source, &encoded) {
            warn!(?source, "failed to send response: {}", e);
        }
        if msg.is_confirmable() {
            self.core.duplicates.insert(source, msg.message_id, CachedReply::Response(encoded), self.now);
        }
    }
}
