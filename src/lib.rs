//! # parley-gateway
//!
//! REST API and WebSocket gateway for negotiated brand-influencer chats.
//!
//! A brand owner and an influencer haggle over a price through a guided
//! flow of system messages and buttons. The agreed amount is held in escrow
//! and released to the influencer, minus the platform commission, when the
//! brand approves the delivered work. The conversation then opens into a
//! free-text chat.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── WS Handler (ws/)
//!     │
//!     ├── ChatService / PaymentService / WalletService (service/)
//!     ├── FlowEngine: pure transition planning (engine/)
//!     ├── EventBus + fan-out dispatcher
//!     │
//!     ├── ChatStore: atomic commit units (store/)
//!     │     ├── MemoryStore
//!     │     └── PostgresStore
//!     │
//!     └── PaymentGateway / Notifier (external/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod external;
pub mod service;
pub mod store;
pub mod ws;
