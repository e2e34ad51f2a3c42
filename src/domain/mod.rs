pub mod format;
pub mod message;
