pub mod assistant;
pub mod auth;
pub mod config;
pub mod extraction;
pub mod participants;
pub mod password;
pub mod postgres_storage;
pub mod server;
pub mod session;
pub mod sql;
pub mod sqlite_storage;
pub mod storage;
pub mod store;
