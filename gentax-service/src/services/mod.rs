pub mod chat;
pub mod knowledge;
pub mod metrics;
pub mod providers;
pub mod session_store;

pub use chat::ChatService;
pub use knowledge::{KnowledgeBase, Retriever};
pub use session_store::SessionStore;
