pub mod inconsistencies_context;
pub mod message_inconsistencies_service;

pub use inconsistencies_context::{Context, Snapshot};
pub use message_inconsistencies_service::*;
