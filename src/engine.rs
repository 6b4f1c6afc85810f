use std::net::SocketAddr;

use tracing::{debug, info, trace, warn};

use crate::config::CoapConfig;
use crate::dispatch::DispatchRouter;
use crate::error::{CoapError, CoapResult};
use crate::handler::{CallbackAction, ClientResponse, ObserverStatusListener, QualityOfService, RequestHandler, ResponseCallback};
use crate::observe::ObserveTracker;
use crate::pdu::code::StackResult;
use crate::pdu::codec;
use crate::pdu::message::{Message, MessageType};
use crate::pdu::option::{CoapOption, OptionNumber, MEDIA_TYPE_APPLICATION_JSON, OBSERVE_DEREGISTER, OBSERVE_REGISTER};
use crate::reliability::{DuplicateCache, MessageIdGenerator, ReliabilityQueue, RetransmitAction};
use crate::token::{Token, TokenGenerator};
use crate::transaction::{Method, Transaction, TransactionHandle, TransactionTable};
use crate::transport::{Clock, MonotonicClock, SocketKind, Tick, Transport};
use crate::uri::CoapUri;
use crate::util::random::{Random, RngRandom};


/// number of attempts to generate a token that is not in use before giving up
const MAX_TOKEN_ATTEMPTS: usize = 8;

/// The engine state that is shared between the application API and the dispatch router
pub(crate) struct EngineCore {
    pub(crate) random: Box<dyn Random>,
    pub(crate) tokens: TokenGenerator,
    pub(crate) message_ids: MessageIdGenerator,
    pub(crate) transactions: TransactionTable,
    pub(crate) reliability: ReliabilityQueue,
    pub(crate) duplicates: DuplicateCache,
    pub(crate) tracker: ObserveTracker,
    pub(crate) request_handler: Option<Box<dyn RequestHandler>>,
    pub(crate) observer_listener: Option<Box<dyn ObserverStatusListener>>,
}

impl EngineCore {
    /// Encodes and sends a message. Confirmable messages are registered for retransmission
    ///  before they are sent, and a failed send leaves them to the retransmission logic.
    pub(crate) fn send_message(&mut self, transport: &dyn Transport, config: &CoapConfig, destination: SocketAddr, message: Message, now: Tick) -> CoapResult<()> {
        let encoded = codec::encode(&message)?;
        if encoded.len() > config.max_datagram_size {
            return Err(CoapError::BufferTooSmall { required: encoded.len(), capacity: config.max_datagram_size });
        }

        trace!(?destination, message_type = ?message.message_type, code = ?message.code, message_id = message.message_id, token = ?message.token, "sending message");
        if message.is_confirmable() {
            self.reliability.schedule(message, encoded.clone(), destination, now, self.random.as_mut())?;
            if let Err(e) = transport.send_datagram(destination, &encoded) {
                //TODO distinguish permanent errors (e.g. unreachable network) from full buffers
                warn!(?destination, "error sending confirmable message - leaving it to retransmission: {}", e);
            }
            Ok(())
        }
        else {
            transport.send_datagram(destination, &encoded)
                .map_err(|e| CoapError::Transport(e.to_string()))
        }
    }
}


/// An explicitly owned instance of the messaging engine. It is driven by calling [CoapEngine::poll]
///  regularly, e.g. through a [crate::driver::CoapDriver].
pub struct CoapEngine {
    config: CoapConfig,
    transport: Box<dyn Transport>,
    clock: Box<dyn Clock>,
    core: EngineCore,
    receive_buffer: Vec<u8>,
}

impl CoapEngine {
    pub fn new(config: CoapConfig, transport: Box<dyn Transport>, clock: Box<dyn Clock>, mut random: Box<dyn Random>) -> anyhow::Result<CoapEngine> {
        config.validate()?;
        info!(self_addr = ?config.self_addr, mode = ?config.mode, presence = config.presence_enabled, "initializing engine");

        let core = EngineCore {
            tokens: TokenGenerator::new(config.token_length),
            message_ids: MessageIdGenerator::new(random.as_mut()),
            random,
            transactions: TransactionTable::new(),
            reliability: ReliabilityQueue::new(&config),
            duplicates: DuplicateCache::new(&config),
            tracker: ObserveTracker::new(config.presence_timeout_percentages.clone()),
            request_handler: None,
            observer_listener: None,
        };

        Ok(CoapEngine {
            // one extra byte to detect datagrams that exceed the maximum size
            receive_buffer: vec![0; config.max_datagram_size + 1],
            config,
            transport,
            clock,
            core,
        })
    }

    /// an engine with a monotonic clock and thread-local randomness
    pub fn with_defaults(config: CoapConfig, transport: Box<dyn Transport>) -> anyhow::Result<CoapEngine> {
        CoapEngine::new(config, transport, Box::new(MonotonicClock::new()), Box::new(RngRandom {}))
    }

    pub fn config(&self) -> &CoapConfig {
        &self.config
    }

    pub fn set_request_handler(&mut self, handler: impl RequestHandler + 'static) {
        self.core.request_handler = Some(Box::new(handler));
    }

    pub fn set_observer_status_listener(&mut self, listener: impl ObserverStatusListener + 'static) {
        self.core.observer_listener = Some(Box::new(listener));
    }

    /// Issues a client request. Responses, notifications and a possible delivery failure are
    ///  passed to `callback` until it returns [CallbackAction::DeleteTransaction] or the
    ///  transaction is cancelled.
    pub fn do_resource(&mut self, method: Method, uri: &str, qos: QualityOfService, payload: &[u8], callback: impl ResponseCallback + 'static) -> CoapResult<TransactionHandle> {
        let parsed = CoapUri::parse(uri)?;
        let token = self.unused_token()?;
        let now = self.clock.now();

        let handle = self.core.transactions.add(Box::new(callback), token, parsed.destination, method, &parsed.to_string())?;
        debug!(?handle, ?method, %parsed, ?token, "issuing request");

        let message_type = match qos {
            QualityOfService::Confirmable => MessageType::Confirmable,
            QualityOfService::NonConfirmable => MessageType::NonConfirmable,
        };
        let mut message = Message::new(message_type, method.request_code(), self.core.message_ids.next_id(), token)
            .with_uri(&parsed.path, &parsed.query)
            .with_payload(payload);
        if matches!(method, Method::Observe | Method::ObserveAll) {
            message.set_observe(OBSERVE_REGISTER);
        }

        if let Err(e) = self.core.send_message(self.transport.as_ref(), &self.config, parsed.destination, message, now) {
            self.core.transactions.delete(handle);
            return Err(e);
        }
        Ok(handle)
    }

    fn unused_token(&mut self) -> CoapResult<Token> {
        for _ in 0..MAX_TOKEN_ATTEMPTS {
            let token = self.core.tokens.generate_token(self.core.random.as_mut());
            if !self.core.transactions.contains_token(&token) {
                return Ok(token);
            }
            debug!(?token, "generated token is in use - retrying");
        }
        Err(CoapError::DuplicateToken)
    }

    /// Cancels an outstanding request. Subscriptions are deregistered with the peer, and all
    ///  messages still queued for the transaction are dropped.
    pub fn cancel(&mut self, handle: TransactionHandle) -> CoapResult<()> {
        let core = &mut self.core;
        let transaction = core.transactions.find_by_handle_mut(handle).ok_or(CoapError::TokenNotFound)?;
        core.tracker.cancel(transaction);

        let token = transaction.token;
        let destination = transaction.destination;
        let method = transaction.method;
        let request_uri = transaction.request_uri.clone();

        core.reliability.cancel_all(destination, &token);
        core.transactions.delete(handle);

        if matches!(method, Method::Observe | Method::ObserveAll) {
            let parsed = CoapUri::parse(&request_uri)?;
            let deregistration = Message::new(MessageType::NonConfirmable, method.request_code(), self.core.message_ids.next_id(), token)
                .with_uri(&parsed.path, &parsed.query)
                .with_option(CoapOption::uint(OptionNumber::OBSERVE, OBSERVE_DEREGISTER));
            let now = self.clock.now();
            debug!(?handle, ?token, "sending observe deregistration");
            self.core.send_message(self.transport.as_ref(), &self.config, destination, deregistration, now)?;
        }
        Ok(())
    }

    /// Sends a notification for an observed resource to one observer, identified by its
    ///  address and the token of its registration. `uri` is the resource's path, optionally
    ///  followed by `?query`. Returns the notification's message id.
    #[allow(clippy::too_many_arguments)]
    pub fn send_notification(&mut self, destination: SocketAddr, token: Token, uri: &str, result: StackResult, qos: QualityOfService, sequence_number: u32, max_age: u32, payload: &[u8]) -> CoapResult<u16> {
        let message_type = match qos {
            QualityOfService::Confirmable => MessageType::Confirmable,
            QualityOfService::NonConfirmable => MessageType::NonConfirmable,
        };
        let message_id = self.core.message_ids.next_id();
        let (path, query) = uri.split_once('?').unwrap_or((uri, ""));

        let mut message = Message::new(message_type, result.to_code(), message_id, token)
            .with_uri(path, query)
            .with_option(CoapOption::uint(OptionNumber::MAX_AGE, max_age));
        message.set_observe(sequence_number);
        if !payload.is_empty() {
            message = message
                .with_option(CoapOption::uint(OptionNumber::CONTENT_FORMAT, MEDIA_TYPE_APPLICATION_JSON))
                .with_payload(payload);
        }

        let now = self.clock.now();
        trace!(?destination, ?token, sequence_number, "sending notification");
        self.core.send_message(self.transport.as_ref(), &self.config, destination, message, now)?;
        Ok(message_id)
    }

    /// Reads at most one datagram per socket and dispatches it, then sends due retransmissions.
    ///  Never blocks.
    pub fn poll(&mut self) {
        let now = self.clock.now();

        for socket in [SocketKind::Unicast, SocketKind::Multicast] {
            match self.transport.try_receive_datagram(socket, &mut self.receive_buffer) {
                Ok(None) => {}
                Ok(Some((len, source))) => {
                    if len > self.config.max_datagram_size {
                        warn!(?source, len, "dropping datagram that exceeds the maximum size");
                        continue;
                    }
                    let mut router = DispatchRouter {
                        config: &self.config,
                        transport: self.transport.as_ref(),
                        core: &mut self.core,
                        now,
                    };
                    router.dispatch(&self.receive_buffer[..len], source);
                }
                Err(e) => warn!(?socket, "error receiving datagram: {}", e),
            }
        }

        self.service_retransmissions(now);
        self.core.duplicates.expire(now);
    }

    fn service_retransmissions(&mut self, now: Tick) {
        for action in self.core.reliability.poll_due(now) {
            match action {
                RetransmitAction::Resend { destination, message_id, encoded, retry_count } => {
                    debug!(?destination, message_id, retry_count, "retransmitting confirmable message");
                    if let Err(e) = self.transport.send_datagram(destination, &encoded) {
                        warn!(?destination, message_id, "error retransmitting message: {}", e);
                    }
                }
                RetransmitAction::Failed(entry) => {
                    let token = entry.message.token;
                    warn!(destination = ?entry.destination, message_id = entry.message.message_id, ?token, "{}", CoapError::CommunicationFailure);

                    let core = &mut self.core;
                    if let Some(transaction) = core.transactions.find_by_token_mut(&token) {
                        let handle = transaction.handle;
                        let response = ClientResponse {
                            handle,
                            result: StackResult::CommunicationError,
                            source: entry.destination,
                            sequence_number: 0,
                            max_age: 0,
                            payload: Vec::new(),
                        };
                        if transaction.invoke_callback(&response) == CallbackAction::DeleteTransaction {
                            core.transactions.delete(handle);
                        }
                    }
                    else if let Some(listener) = core.observer_listener.as_mut() {
                        listener.on_observer_status_changed(token, false);
                    }
                }
            }
        }
    }

    /// Handles of presence subscriptions whose current wake time has passed. The application is
    ///  expected to query the presence source for each of them.
    pub fn take_due_presence_wakeups(&mut self) -> Vec<TransactionHandle> {
        let now = self.clock.now();
        self.core.tracker.take_due_wakeups(&mut self.core.transactions, now)
    }

    pub fn transaction(&self, handle: TransactionHandle) -> Option<&Transaction> {
        self.core.transactions.find_by_handle(handle)
    }

    pub fn transaction_count(&self) -> usize {
        self.core.transactions.len()
    }

    pub fn pending_confirmable_count(&self) -> usize {
        self.core.reliability.len()
    }

    pub fn next_retransmission_deadline(&self) -> Option<Tick> {
        self.core.reliability.next_deadline()
    }

    /// Drops all transactions and pending messages without notifying anybody
    pub fn shutdown(&mut self) {
        info!(transactions = self.core.transactions.len(), pending = self.core.reliability.len(), "shutting down engine");
        self.core.transactions.delete_all();
        self.core.reliability.clear();
        self.core.duplicates.clear();
    }
}
