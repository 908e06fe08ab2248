pub mod config;
pub mod connection_manager;
pub mod driver;
pub mod export;
pub mod formatter;
pub mod history;
pub mod pagination;
pub mod query_executor;
pub mod session;
pub mod sql;
pub mod value;
