//! Utilities for testing code built on the engine: an in-memory transport, a manually advanced
//!  clock and recorders for callbacks. They are used for the engine's own tests, but they are
//!  exported for application testing as well, which is why they are part of the crate's regular
//!  (non-#[cfg(test)]) code.

pub mod clock;
pub mod recorder;
pub mod transport;

use std::net::{Ipv4Addr, SocketAddr};


/// an IPV4 loopback-style address that makes test peers easy to tell apart by their number
pub fn test_addr_from_number(number: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::new(10, 0, 0, (number % 250) as u8 + 1), 5683 + number / 250))
}
