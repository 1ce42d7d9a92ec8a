pub mod services;
pub mod tasks;
