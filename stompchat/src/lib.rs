//! `StompChat`: STOMP-over-WebSocket chat client core.
//!
//! A [`connection::ConnectionManager`] keeps one broker session per scope
//! (the lobby or a room), its [`store::SessionStore`] holds the ordered
//! history and roster, [`pagination::PaginationFetcher`] loads older pages,
//! and [`router::send`] publishes typed input.

pub mod auth;
pub mod config;
pub mod connection;
pub mod display;
pub mod pagination;
pub mod router;
pub mod stomp;
pub mod store;
pub mod subscription;
pub mod transport;
