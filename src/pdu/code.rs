use std::fmt::{Debug, Formatter};


/// The code byte of a message: a 3-bit class and a 5-bit detail, written as `c.dd`.
///  Class 0 holds the request methods (and the empty code), classes 2, 4 and 5 hold responses.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct Code(pub u8);

impl Code {
    pub const EMPTY: Code = Code::new(0, 0);

    pub const GET: Code = Code::new(0, 1);
    pub const POST: Code = Code::new(0, 2);
    pub const PUT: Code = Code::new(0, 3);
    pub const DELETE: Code = Code::new(0, 4);

    pub const CREATED: Code = Code::new(2, 1);
    pub const DELETED: Code = Code::new(2, 2);
    pub const VALID: Code = Code::new(2, 3);
    pub const CHANGED: Code = Code::new(2, 4);
    pub const CONTENT: Code = Code::new(2, 5);

    pub const BAD_REQUEST: Code = Code::new(4, 0);
    pub const BAD_OPTION: Code = Code::new(4, 2);
    pub const NOT_FOUND: Code = Code::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);

    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);
    pub const NOT_IMPLEMENTED: Code = Code::new(5, 1);
    pub const SERVICE_UNAVAILABLE: Code = Code::new(5, 3);

    pub const fn new(class: u8, detail: u8) -> Code {
        Code((class << 5) | (detail & 0x1f))
    }

    pub fn class(&self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(&self) -> u8 {
        self.0 & 0x1f
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_request(&self) -> bool {
        self.class() == 0 && !self.is_empty()
    }

    pub fn is_response(&self) -> bool {
        matches!(self.class(), 2 | 4 | 5)
    }
}

impl Debug for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}


/// Request methods as they appear on the wire
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Delete,
}
impl RequestMethod {
    pub fn from_code(code: Code) -> Option<RequestMethod> {
        match code {
            Code::GET => Some(RequestMethod::Get),
            Code::POST => Some(RequestMethod::Post),
            Code::PUT => Some(RequestMethod::Put),
            Code::DELETE => Some(RequestMethod::Delete),
            _ => None,
        }
    }

    pub fn code(&self) -> Code {
        match self {
            RequestMethod::Get => Code::GET,
            RequestMethod::Post => Code::POST,
            RequestMethod::Put => Code::PUT,
            RequestMethod::Delete => Code::DELETE,
        }
    }
}


/// The engine's result taxonomy. It is what request handlers return and what response
///  callbacks receive, and it maps to and from wire response codes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StackResult {
    Ok,
    ResourceCreated,
    ResourceDeleted,
    InvalidQuery,
    InvalidParam,
    InvalidMethod,
    NoResource,
    NotImplemented,
    CommunicationError,
    PresenceNoUpdate,
    PresenceStopped,
    /// returned by a request handler to suppress any response, e.g. for a presence request
    PresenceDoNotHandle,
    ObserverNotAdded,
    ObserverNotRemoved,
    Error,
}

impl StackResult {
    pub fn to_code(&self) -> Code {
        match self {
            StackResult::Ok => Code::CONTENT,
            StackResult::ResourceCreated => Code::CREATED,
            StackResult::ResourceDeleted => Code::DELETED,
            StackResult::InvalidQuery => Code::BAD_REQUEST,
            StackResult::InvalidParam => Code::BAD_OPTION,
            StackResult::NoResource => Code::NOT_FOUND,
            StackResult::InvalidMethod => Code::METHOD_NOT_ALLOWED,
            StackResult::NotImplemented => Code::NOT_IMPLEMENTED,
            _ => Code::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn from_code(code: Code) -> StackResult {
        match code {
            Code::CONTENT | Code::VALID | Code::CHANGED => StackResult::Ok,
            Code::CREATED => StackResult::ResourceCreated,
            Code::DELETED => StackResult::ResourceDeleted,
            Code::BAD_REQUEST => StackResult::InvalidQuery,
            Code::BAD_OPTION => StackResult::InvalidParam,
            Code::NOT_FOUND => StackResult::NoResource,
            Code::METHOD_NOT_ALLOWED => StackResult::InvalidMethod,
            Code::NOT_IMPLEMENTED => StackResult::NotImplemented,
            _ => StackResult::Error,
        }
    }
}
