pub mod mysql;

pub use mysql::MysqlBackend;
