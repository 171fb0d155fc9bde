//! Core data model.
//!
//! A message is one unit of work on a named queue. It carries an opaque JSON
//! body and a lifecycle state that only the claim engine advances.

pub mod channel;
pub mod message;

pub use channel::Channel;
pub use message::{Message, MessageId, MessageState};
