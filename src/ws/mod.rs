//! WebSocket layer: connection handling and message routing.
//!
//! The WebSocket endpoint at `/ws` joins the caller's room `user_{id}`,
//! pushes realtime chat events and accepts the same commands as the HTTP
//! conversation endpoints.

pub mod connection;
pub mod handler;
pub mod messages;
