//! Core types for Carnet.

pub mod message;
pub mod stream;

pub use message::*;
pub use stream::*;
