pub mod list;
pub mod reconcile;

pub use list::RenderedList;
pub use reconcile::{Edit, reconcile};
