pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod gpg;
pub mod mail;
pub mod proxy;
pub mod session;
pub mod store;
pub mod view;

pub use error::{Error, Result};
