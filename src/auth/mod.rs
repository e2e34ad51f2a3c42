pub mod prompt;
pub mod secret_store;

pub use prompt::{CredentialPrompt, StdinPrompt};
