//! Authorization against the remote service.
//!
//! ```text
//! begin_auth → authorize_url → (user consents in browser) → complete_auth → CredentialStore::save
//! ```

pub mod credential_store;
pub mod flow;

pub use credential_store::{CredentialStore, InvalidateOnReauth};
pub use flow::{AuthFlow, AuthState};
