//! Domain models for the GenTax service.

pub mod chat;
pub mod session;

pub use chat::{ChatQuery, ChatResponse, Citation, SessionResponse};
pub use session::{ChatMessage, Role};
