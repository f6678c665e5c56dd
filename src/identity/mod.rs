//! Who requests run as, and where their credentials come from.

mod principal;
pub mod credentials;

pub use principal::Principal;
pub use credentials::{bootstrap_admin, resolve_credentials, CredentialPrompt, CredentialSource, Credentials, TerminalPrompt};
