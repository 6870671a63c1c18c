//! Wire-level message types and topic handling
//!
//! This module defines the JSON message structures exchanged with the cloud
//! endpoint (remote setting updates and their outcome reports) and the topic
//! canonicalization rules shared by the transport layer.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
