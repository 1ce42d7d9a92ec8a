pub mod solve_message_inconsistencies_task;

pub use solve_message_inconsistencies_task::*;
