//! Session refresh coordinator for LiveLink.
//!
//! Keeps an access token valid by refreshing it ahead of expiry. Token
//! state lives in a [`TokenStorage`] that is re-read on every decision, so
//! several coordinators over the same storage agree on the latest write.
//!
//! Lifecycle changes are broadcast as [`SessionEvent`]s. Repeated refresh
//! failures trip a circuit breaker that deletes the stored tokens and emits
//! [`SessionEvent::TokensCleared`]; the user must sign in again.

pub mod auth_client;
pub mod claims;
pub mod coordinator;
pub mod error;
pub mod schedule;
pub mod storage;
pub mod tokens;
pub mod types;

pub use auth_client::AuthClient;
pub use coordinator::SessionCoordinator;
pub use error::{RefreshError, SessionError};
pub use schedule::RefreshSchedule;
pub use storage::{FileTokenStore, MemoryTokenStore, TOKEN_STORAGE_KEY, TokenStorage};
pub use tokens::StoredTokens;
pub use types::{Clock, SessionConfig, SessionEvent, SystemClock};
