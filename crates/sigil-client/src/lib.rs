//! # sigil-client
//!
//! The session-level façade over the Sigil encrypted conversation vault:
//! key derivation at login, conversation and message CRUD through the
//! crypto codec and local store, live search, and remote sync wiring.

pub mod events;
pub mod logging;
pub mod service;
pub mod session;

mod error;

pub use error::ServiceError;
pub use events::{response_channel, ResponseEvent};
pub use service::{ConversationDataService, PendingTurn};
pub use session::ClientSession;
