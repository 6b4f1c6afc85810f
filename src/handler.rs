//! The interfaces between the engine and the application: what a request handler sees and
//!  returns, and how outcomes of client requests and observer registrations are reported.

use std::net::SocketAddr;

use crate::pdu::code::{RequestMethod, StackResult};
use crate::token::Token;
use crate::transaction::TransactionHandle;


#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum QualityOfService {
    /// sent as a confirmable message, retransmitted until it is acknowledged or given up
    Confirmable,
    NonConfirmable,
}

/// A request received from a peer, decoded for the resource layer
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EntityRequest {
    pub method: RequestMethod,
    pub qos: QualityOfService,
    pub uri: String,
    pub query: String,
    pub payload: Vec<u8>,
    /// the raw Observe option value (0 to register, 1 to deregister) if present
    pub observe: Option<u32>,
    pub source: SocketAddr,
    pub token: Token,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ObserveOutcome {
    NotRequested,
    /// the requester was added as an observer, and the response carries this sequence number
    Registered { sequence_number: u32 },
    Deregistered,
    Rejected,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EntityResponse {
    pub result: StackResult,
    pub payload: Vec<u8>,
    pub observe: ObserveOutcome,
}
impl EntityResponse {
    pub fn new(result: StackResult, payload: impl Into<Vec<u8>>) -> EntityResponse {
        EntityResponse {
            result,
            payload: payload.into(),
            observe: ObserveOutcome::NotRequested,
        }
    }

    pub fn with_observe(mut self, observe: ObserveOutcome) -> EntityResponse {
        self.observe = observe;
        self
    }
}

pub trait RequestHandler {
    fn on_request(&mut self, request: &EntityRequest) -> EntityResponse;
}
impl<F: FnMut(&EntityRequest) -> EntityResponse> RequestHandler for F {
    fn on_request(&mut self, request: &EntityRequest) -> EntityResponse {
        self(request)
    }
}


/// What a client transaction's callback sees for every response, notification or failure
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClientResponse {
    pub handle: TransactionHandle,
    pub result: StackResult,
    pub source: SocketAddr,
    /// the Observe sequence number, 0 if the response had none
    pub sequence_number: u32,
    pub max_age: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CallbackAction {
    KeepTransaction,
    DeleteTransaction,
}

pub trait ResponseCallback {
    fn on_response(&mut self, response: &ClientResponse) -> CallbackAction;
}
impl<F: FnMut(&ClientResponse) -> CallbackAction> ResponseCallback for F {
    fn on_response(&mut self, response: &ClientResponse) -> CallbackAction {
        self(response)
    }
}


/// Server side: learns whether a registered observer (identified by its token) still wants
///  notifications, based on how the observer reacted to a confirmable notification.
pub trait ObserverStatusListener {
    fn on_observer_status_changed(&mut self, token: Token, still_interested: bool);
}
impl<F: FnMut(Token, bool)> ObserverStatusListener for F {
    fn on_observer_status_changed(&mut self, token: Token, still_interested: bool) {
        self(token, still_interested)
    }
}
