pub mod mailbox;

pub use mailbox::{BATCH_SIZE, Direction, FetchRequest, MailboxStore};
