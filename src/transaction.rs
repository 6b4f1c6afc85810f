use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;

use tracing::{debug, trace};

use crate::error::{CoapError, CoapResult};
use crate::handler::{CallbackAction, ClientResponse, ResponseCallback};
use crate::observe::{ObserveState, PresenceState};
use crate::pdu::code::Code;
use crate::token::Token;


/// Identifies an outstanding client request towards the application
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TransactionHandle(pub u64);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Method {
    Get,
    Put,
    Observe,
    ObserveAll,
    Presence,
}
impl Method {
    pub fn request_code(&self) -> Code {
        match self {
            Method::Put => Code::PUT,
            Method::Get | Method::Observe | Method::ObserveAll | Method::Presence => Code::GET,
        }
    }

    /// methods whose transaction outlives the first response
    pub fn is_observing(&self) -> bool {
        matches!(self, Method::Observe | Method::ObserveAll | Method::Presence)
    }
}


pub struct Transaction {
    pub token: Token,
    pub handle: TransactionHandle,
    pub destination: SocketAddr,
    pub method: Method,
    pub request_uri: String,
    /// highest Observe sequence number accepted so far
    pub sequence_number: u32,
    pub observe_state: ObserveState,
    pub presence: Option<PresenceState>,
    callback: Box<dyn ResponseCallback>,
}
impl Transaction {
    pub fn invoke_callback(&mut self, response: &ClientResponse) -> CallbackAction {
        self.callback.on_response(response)
    }
}
impl Debug for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("token", &self.token)
            .field("handle", &self.handle)
            .field("destination", &self.destination)
            .field("method", &self.method)
            .field("request_uri", &self.request_uri)
            .field("sequence_number", &self.sequence_number)
            .field("observe_state", &self.observe_state)
            .field("presence", &self.presence)
            .finish()
    }
}


/// All outstanding client requests, in registration order. Lookups return the first match.
#[derive(Default)]
pub struct TransactionTable {
    transactions: Vec<Transaction>,
    next_handle: u64,
}

impl TransactionTable {
    pub fn new() -> TransactionTable {
        TransactionTable::default()
    }

    pub fn add(&mut self, callback: Box<dyn ResponseCallback>, token: Token, destination: SocketAddr, method: Method, request_uri: &str) -> CoapResult<TransactionHandle> {
        if self.contains_token(&token) {
            return Err(CoapError::DuplicateToken);
        }

        // reserve everything before touching the table so that a failed allocation leaves no trace
        self.transactions.try_reserve(1)?;
        let mut uri = String::new();
        uri.try_reserve(request_uri.len())?;
        uri.push_str(request_uri);

        self.next_handle += 1;
        let handle = TransactionHandle(self.next_handle);
        trace!(?token, ?handle, ?method, uri, "adding transaction");

        self.transactions.push(Transaction {
            token,
            handle,
            destination,
            method,
            request_uri: uri,
            sequence_number: 0,
            observe_state: ObserveState::Idle,
            presence: None,
            callback,
        });
        Ok(handle)
    }

    pub fn contains_token(&self, token: &Token) -> bool {
        self.find_by_token(token).is_some()
    }

    pub fn find_by_token(&self, token: &Token) -> Option<&Transaction> {
        self.transactions.iter().find(|t| &t.token == token)
    }

    pub fn find_by_token_mut(&mut self, token: &Token) -> Option<&mut Transaction> {
        self.transactions.iter_mut().find(|t| &t.token == token)
    }

    pub fn find_by_handle(&self, handle: TransactionHandle) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.handle == handle)
    }

    pub fn find_by_handle_mut(&mut self, handle: TransactionHandle) -> Option<&mut Transaction> {
        self.transactions.iter_mut().find(|t| t.handle == handle)
    }

    pub fn find_by_uri(&self, uri: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.request_uri == uri)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Transaction> {
        self.transactions.iter_mut()
    }

    pub fn delete(&mut self, handle: TransactionHandle) -> Option<Transaction> {
        let idx = self.transactions.iter().position(|t| t.handle == handle)?;
        let removed = self.transactions.remove(idx);
        debug!(token = ?removed.token, ?handle, "deleted transaction");
        Some(removed)
    }

    pub fn delete_all(&mut self) {
        debug!(count = self.transactions.len(), "deleting all transactions");
        self.transactions.clear();
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
