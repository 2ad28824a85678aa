//! Shared protocol definitions for the `StompChat` wire format.

pub mod destination;
pub mod frame;
pub mod message;
