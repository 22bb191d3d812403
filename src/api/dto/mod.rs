//! Data Transfer Objects for REST request/response serialization.
//!
//! Amounts are integer minor units (paise for INR) everywhere.

pub mod common_dto;
pub mod conversation_dto;
pub mod payment_dto;
pub mod request_dto;
pub mod user_dto;
pub mod wallet_dto;

pub use common_dto::*;
pub use conversation_dto::*;
pub use payment_dto::*;
pub use request_dto::*;
pub use user_dto::*;
pub use wallet_dto::*;
