use thiserror::Error;

pub const SHOW_TABLES_SQL: &str = "SHOW TABLES";
pub const SHOW_DATABASES_SQL: &str = "SHOW DATABASES";
pub const SERVER_VERSION_SQL: &str = "SELECT VERSION()";
pub const SERVER_TIME_SQL: &str = "SELECT NOW()";
pub const CONNECTION_ID_SQL: &str = "SELECT CONNECTION_ID()";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SqlGenerationError {
    #[error("table name cannot be empty")]
    EmptyTableName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableName<'a>(&'a str);

impl<'a> TableName<'a> {
    pub fn new(table: &'a str) -> Result<Self, SqlGenerationError> {
        if table.trim().is_empty() {
            return Err(SqlGenerationError::EmptyTableName);
        }
        Ok(Self(table))
    }

    #[must_use]
    pub fn quoted(&self) -> String {
        quote_identifier(self.0)
    }
}

#[must_use]
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

#[must_use]
pub fn count_rows_sql(table: TableName<'_>) -> String {
    format!("SELECT COUNT(*) FROM {}", table.quoted())
}

#[must_use]
pub fn offset_page_sql(table: TableName<'_>, limit: usize, offset: usize) -> String {
    format!(
        "SELECT * FROM {} LIMIT {} OFFSET {}",
        table.quoted(),
        limit,
        offset
    )
}

#[must_use]
pub fn describe_table_sql(table: TableName<'_>) -> String {
    format!("DESCRIBE {}", table.quoted())
}
