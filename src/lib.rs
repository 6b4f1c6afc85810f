pub mod config;
pub mod dispatch;
pub mod driver;
pub mod engine;
pub mod error;
pub mod handler;
pub mod observe;
pub mod pdu;
pub mod reliability;
pub mod token;
pub mod transaction;
pub mod transport;
pub mod uri;
pub mod util;
pub mod test_util;
