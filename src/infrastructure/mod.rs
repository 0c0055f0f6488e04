pub mod break_repository;
pub mod config;
pub mod error;
pub mod notification_host;
pub mod statistics_repository;
pub mod storage;
