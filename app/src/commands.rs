use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use boba_adapters::MysqlBackend;
use boba_core::config::{ClientConfig, ConnectionConfig, OutputFormat};
use boba_core::connection_manager::{ConnectionError, ConnectionManager};
use boba_core::export::{export_to_path, ExportError};
use boba_core::formatter::{render, TableStyle};
use boba_core::query_executor::{QueryBackend, QueryError, QueryExecutor, QueryOutcome, QueryResult};
use boba_core::sql::{
    describe_table_sql, SqlGenerationError, TableName, CONNECTION_ID_SQL, SERVER_TIME_SQL,
    SERVER_VERSION_SQL, SHOW_DATABASES_SQL, SHOW_TABLES_SQL,
};
use thiserror::Error;
use tokio::runtime::Runtime;

use crate::cli::{Command, ListTarget};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Sql(#[from] SqlGenerationError),
    #[error("`{0}` does not return rows, nothing to export")]
    NothingToExport(String),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// Commands that connect, do one thing and exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OneShot {
    Query(String),
    Status,
    List(ListTarget),
    Describe(String),
    Export { query: String, file: PathBuf },
}

impl OneShot {
    /// `None` for the interactive session.
    #[must_use]
    pub fn from_command(command: Command) -> Option<Self> {
        match command {
            Command::Interactive => None,
            Command::Query { sql } => Some(Self::Query(sql.join(" "))),
            Command::Status => Some(Self::Status),
            Command::List { target } => Some(Self::List(target)),
            Command::Describe { table } => Some(Self::Describe(table)),
            Command::Export { query, file } => Some(Self::Export { query, file }),
        }
    }
}

/// How one-shot output is rendered. `export_format` is CSV unless the user
/// passed `--format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputOptions {
    pub format: OutputFormat,
    pub export_format: OutputFormat,
    pub style: TableStyle,
}

pub fn run(
    runtime: &Runtime,
    config: &ClientConfig,
    options: OutputOptions,
    command: OneShot,
) -> Result<(), CommandError> {
    let backend = Arc::new(MysqlBackend);
    let stdout = io::stdout();
    runtime.block_on(execute(
        backend,
        config,
        options,
        command,
        &mut stdout.lock(),
    ))
}

pub async fn execute<B: QueryBackend, W: Write>(
    backend: Arc<B>,
    config: &ClientConfig,
    options: OutputOptions,
    command: OneShot,
    out: &mut W,
) -> Result<(), CommandError> {
    let mut connections = ConnectionManager::new(Arc::clone(&backend), config.query.connect_timeout());
    let latency = connections.connect(config.connection.clone()).await?;
    let executor = QueryExecutor::new(backend, config.query.timeout());

    let result = match connections.current() {
        Some(connection) => {
            let runner = Runner {
                connection,
                executor: &executor,
                options,
            };
            runner.run(command, &config.connection, latency, out).await
        }
        None => Err(ConnectionError::Refused("connection closed unexpectedly".to_string()).into()),
    };
    connections.close().await;
    result
}

struct Runner<'a, B: QueryBackend> {
    connection: &'a B::Connection,
    executor: &'a QueryExecutor<B>,
    options: OutputOptions,
}

impl<B: QueryBackend> Runner<'_, B> {
    async fn query(&self, sql: &str) -> Result<QueryOutcome, QueryError> {
        self.executor.execute(self.connection, sql).await
    }

    async fn scalar(&self, sql: &str) -> Result<String, QueryError> {
        let outcome = self.query(sql).await?;
        Ok(outcome
            .into_result()
            .and_then(|result| result.first_cell().map(str::to_string))
            .unwrap_or_default())
    }

    async fn run<W: Write>(
        &self,
        command: OneShot,
        target: &ConnectionConfig,
        latency: std::time::Duration,
        out: &mut W,
    ) -> Result<(), CommandError> {
        match command {
            OneShot::Query(sql) => {
                let outcome = self.query(&sql).await?;
                self.print_outcome(outcome, out)
            }
            OneShot::Status => {
                let version = self.scalar(SERVER_VERSION_SQL).await?;
                let time = self.scalar(SERVER_TIME_SQL).await?;
                let connection_id = self.scalar(CONNECTION_ID_SQL).await?;
                writeln!(out, "Host:           {}:{}", target.host, target.port)?;
                writeln!(out, "User:           {}", target.user)?;
                writeln!(out, "Database:       {}", target.database)?;
                writeln!(out, "Server version: {version}")?;
                writeln!(out, "Server time:    {time}")?;
                writeln!(out, "Connection id:  {connection_id}")?;
                writeln!(out, "Latency:        {} ms", latency.as_millis())?;
                Ok(())
            }
            OneShot::List(target) => {
                let sql = match target {
                    ListTarget::Tables => SHOW_TABLES_SQL,
                    ListTarget::Databases => SHOW_DATABASES_SQL,
                };
                let outcome = self.query(sql).await?;
                self.print_outcome(outcome, out)
            }
            OneShot::Describe(table) => {
                let sql = describe_table_sql(TableName::new(&table)?);
                let outcome = self.query(&sql).await?;
                self.print_outcome(outcome, out)
            }
            OneShot::Export { query, file } => {
                let Some(result) = self.query(&query).await?.into_result() else {
                    return Err(CommandError::NothingToExport(query));
                };
                let receipt =
                    export_to_path(&file, self.options.export_format, &result, &self.options.style)?;
                writeln!(
                    out,
                    "Exported {} rows to {}",
                    receipt.rows,
                    receipt.path.display()
                )?;
                Ok(())
            }
        }
    }

    fn print_outcome<W: Write>(&self, outcome: QueryOutcome, out: &mut W) -> Result<(), CommandError> {
        match outcome {
            QueryOutcome::Read(result) => self.print_rows(&result, out),
            QueryOutcome::Write(summary) => {
                writeln!(out, "Query OK, {} rows affected", summary.rows_affected)?;
                if let Some(id) = summary.last_insert_id {
                    writeln!(out, "Last insert id: {id}")?;
                }
                Ok(())
            }
        }
    }

    fn print_rows<W: Write>(&self, result: &QueryResult, out: &mut W) -> Result<(), CommandError> {
        let rendered = render(self.options.format, result, &self.options.style);
        writeln!(out, "{}", rendered.trim_end_matches('\n'))?;
        // Machine-readable formats stay parseable, so only the table gets a footer.
        if self.options.format == OutputFormat::Table && !result.is_empty() {
            writeln!(out, "{} rows returned", result.row_count())?;
        }
        Ok(())
    }
}
