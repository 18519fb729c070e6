//! Shared protocol types for wsgate
//!
//! Defines the JSON messages exchanged between the gateway and the
//! external consumer that decides which clients may connect.

pub mod envelope;
pub mod messages;

pub use envelope::*;
pub use messages::*;
