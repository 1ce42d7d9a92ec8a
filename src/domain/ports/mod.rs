pub mod imap_uid_repository;
pub mod message_id_repository;
pub mod task;
pub mod task_spawner;
pub mod time_service;
