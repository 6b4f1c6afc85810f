//! Messages as they travel on the wire: header, token, options and payload, plus the
//!  mapping between wire codes and the engine's result taxonomy.

pub mod code;
pub mod codec;
pub mod message;
pub mod option;
