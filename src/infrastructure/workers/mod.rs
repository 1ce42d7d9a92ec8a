pub mod task_factory;
pub mod task_manager;

pub use task_factory::*;
pub use task_manager::*;
