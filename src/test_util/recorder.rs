use std::cell::RefCell;
use std::rc::Rc;

use crate::handler::{CallbackAction, ClientResponse, ObserverStatusListener, ResponseCallback};
use crate::token::Token;


/// Records every response passed to a transaction callback, answering each with a fixed action
#[derive(Clone)]
pub struct ResponseRecorder {
    responses: Rc<RefCell<Vec<ClientResponse>>>,
    action: CallbackAction,
}
impl ResponseRecorder {
    pub fn new(action: CallbackAction) -> ResponseRecorder {
        ResponseRecorder {
            responses: Default::default(),
            action,
        }
    }

    pub fn responses(&self) -> Vec<ClientResponse> {
        self.responses.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.responses.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.borrow().is_empty()
    }
}
impl ResponseCallback for ResponseRecorder {
    fn on_response(&mut self, response: &ClientResponse) -> CallbackAction {
        self.responses.borrow_mut().push(response.clone());
        self.action
    }
}


#[derive(Clone, Default)]
pub struct ObserverStatusRecorder {
    events: Rc<RefCell<Vec<(Token, bool)>>>,
}
impl ObserverStatusRecorder {
    pub fn events(&self) -> Vec<(Token, bool)> {
        self.events.borrow().clone()
    }
}
impl ObserverStatusListener for ObserverStatusRecorder {
    fn on_observer_status_changed(&mut self, token: Token, still_interested: bool) {
        self.events.borrow_mut().push((token, still_interested));
    }
}
