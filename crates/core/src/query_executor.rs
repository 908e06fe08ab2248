use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use crate::connection_manager::ConnectionBackend;
use crate::value::CellValue;

const READ_PREFIXES: [&str; 4] = ["select", "show", "describe", "desc"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Write,
}

/// Strips surrounding whitespace and trailing statement terminators.
#[must_use]
pub fn normalize_query_text(text: &str) -> &str {
    text.trim().trim_end_matches(';').trim_end()
}

#[must_use]
pub fn classify(text: &str) -> StatementKind {
    let lowered = text.trim().to_lowercase();
    if READ_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
    {
        StatementKind::Read
    } else {
        StatementKind::Write
    }
}

/// Raw read result as produced by a driver, before normalization.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rowset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecSummary {
    pub rows_affected: u64,
    pub last_insert_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryFailureKind {
    Syntax,
    Execution,
    ColumnIntrospection,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct QueryBackendError {
    kind: QueryFailureKind,
    message: String,
}

impl QueryBackendError {
    #[must_use]
    pub fn new(kind: QueryFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(QueryFailureKind::Execution, message)
    }

    #[must_use]
    pub fn kind(&self) -> QueryFailureKind {
        self.kind
    }
}

#[async_trait]
pub trait QueryBackend: ConnectionBackend {
    async fn query(&self, connection: &Self::Connection, sql: &str)
        -> Result<Rowset, QueryBackendError>;
    async fn exec(
        &self,
        connection: &Self::Connection,
        sql: &str,
    ) -> Result<ExecSummary, QueryBackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("query failed: {0}")]
    Execution(String),
    #[error("failed to read result columns: {0}")]
    ColumnIntrospection(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

impl From<QueryBackendError> for QueryError {
    fn from(error: QueryBackendError) -> Self {
        match error.kind {
            QueryFailureKind::Syntax => Self::Syntax(error.message),
            QueryFailureKind::Execution => Self::Execution(error.message),
            QueryFailureKind::ColumnIntrospection => Self::ColumnIntrospection(error.message),
        }
    }
}

/// Normalized read result. Every row has exactly `columns.len()` cells.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryResult {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, QueryError> {
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(QueryError::ColumnIntrospection(format!(
                "row {} has {} values but the result has {} columns",
                index + 1,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn from_rowset(rowset: Rowset) -> Result<Self, QueryError> {
        let rows = rowset
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(CellValue::into_text).collect())
            .collect();
        Self::new(rowset.columns, rows)
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in `[offset, offset + limit)`, clipped to what exists.
    #[must_use]
    pub fn window(&self, offset: usize, limit: usize) -> &[Vec<String>] {
        let start = offset.min(self.rows.len());
        let end = offset.saturating_add(limit).min(self.rows.len());
        &self.rows[start..end]
    }

    #[must_use]
    pub fn first_cell(&self) -> Option<&str> {
        self.rows.first().and_then(|row| row.first()).map(String::as_str)
    }

    /// Values of the first column, e.g. the table names of `SHOW TABLES`.
    #[must_use]
    pub fn first_column(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.first().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Read(QueryResult),
    Write(ExecSummary),
}

impl QueryOutcome {
    #[must_use]
    pub fn into_result(self) -> Option<QueryResult> {
        match self {
            Self::Read(result) => Some(result),
            Self::Write(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct QueryExecutor<B: QueryBackend> {
    backend: Arc<B>,
    timeout: Duration,
}

impl<B: QueryBackend> Clone for QueryExecutor<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            timeout: self.timeout,
        }
    }
}

impl<B: QueryBackend> QueryExecutor<B> {
    #[must_use]
    pub fn new(backend: Arc<B>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn execute(
        &self,
        connection: &B::Connection,
        text: &str,
    ) -> Result<QueryOutcome, QueryError> {
        let sql = normalize_query_text(text);
        let kind = classify(sql);
        let started_at = Instant::now();
        tracing::debug!(?kind, sql, "executing query");

        let outcome = tokio::time::timeout(self.timeout, self.run(connection, sql, kind))
            .await
            .map_err(|_| QueryError::Timeout(self.timeout))
            .and_then(|result| result);

        let elapsed_ms = started_at.elapsed().as_millis();
        match &outcome {
            Ok(QueryOutcome::Read(result)) => {
                tracing::info!(elapsed_ms, rows = result.row_count(), "read query completed");
            }
            Ok(QueryOutcome::Write(summary)) => {
                tracing::info!(
                    elapsed_ms,
                    rows_affected = summary.rows_affected,
                    "write query completed"
                );
            }
            Err(error) => tracing::warn!(elapsed_ms, %error, "query failed"),
        }
        outcome
    }

    async fn run(
        &self,
        connection: &B::Connection,
        sql: &str,
        kind: StatementKind,
    ) -> Result<QueryOutcome, QueryError> {
        match kind {
            StatementKind::Read => {
                let rowset = self.backend.query(connection, sql).await?;
                QueryResult::from_rowset(rowset).map(QueryOutcome::Read)
            }
            StatementKind::Write => {
                let mut summary = self.backend.exec(connection, sql).await?;
                summary.last_insert_id = summary.last_insert_id.filter(|id| *id > 0);
                Ok(QueryOutcome::Write(summary))
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::testing::ScriptedBackend;
    use super::{
        classify, normalize_query_text, ExecSummary, QueryBackendError, QueryError,
        QueryExecutor, QueryFailureKind, QueryOutcome, QueryResult, Rowset, StatementKind,
    };
    use crate::value::CellValue;

    fn executor(backend: ScriptedBackend) -> QueryExecutor<ScriptedBackend> {
        QueryExecutor::new(Arc::new(backend), Duration::from_secs(5))
    }

    #[test]
    fn classification_uses_leading_keyword() {
        assert_eq!(classify("  SELECT 1"), StatementKind::Read);
        assert_eq!(classify("show tables"), StatementKind::Read);
        assert_eq!(classify("DESCRIBE users"), StatementKind::Read);
        assert_eq!(classify("desc users"), StatementKind::Read);
        assert_eq!(classify("UPDATE users SET a = 1"), StatementKind::Write);
        assert_eq!(classify("insert into t values (1)"), StatementKind::Write);
        assert_eq!(classify("WITH x AS (SELECT 1) SELECT * FROM x"), StatementKind::Write);
    }

    #[test]
    fn query_text_normalization_strips_terminators() {
        assert_eq!(normalize_query_text("  SELECT 1;  "), "SELECT 1");
        assert_eq!(normalize_query_text("SELECT 1 ;;"), "SELECT 1");
        assert_eq!(normalize_query_text("   "), "");
    }

    #[test]
    fn result_rejects_ragged_rows() {
        let err = QueryResult::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec!["1".to_string()]],
        )
        .expect_err("ragged rows should be rejected");
        assert!(matches!(err, QueryError::ColumnIntrospection(_)));
    }

    #[test]
    fn window_clips_to_available_rows() {
        let rows = (1..=5).map(|n| vec![n.to_string()]).collect();
        let result = QueryResult::new(vec!["n".to_string()], rows).expect("valid result");
        assert_eq!(result.window(3, 10).len(), 2);
        assert!(result.window(9, 10).is_empty());
        assert_eq!(result.window(0, 2)[1][0], "2");
    }

    #[tokio::test]
    async fn read_query_normalizes_every_cell() {
        let backend = Arc::new(ScriptedBackend::default().with_read(
            "SELECT id, name, score, blob FROM t",
            Rowset {
                columns: vec![
                    "id".to_string(),
                    "name".to_string(),
                    "score".to_string(),
                    "blob".to_string(),
                ],
                rows: vec![vec![
                    CellValue::Integer(1),
                    CellValue::Null,
                    CellValue::Float(2.5),
                    CellValue::Binary(b"raw".to_vec()),
                ]],
            },
        ));

        let outcome = QueryExecutor::new(Arc::clone(&backend), Duration::from_secs(5))
            .execute(&1, "SELECT id, name, score, blob FROM t;")
            .await
            .expect("query should succeed");
        let QueryOutcome::Read(result) = outcome else {
            panic!("expected read outcome");
        };
        assert_eq!(result.rows(), &[vec!["1", "NULL", "2.5", "raw"]]);
        assert_eq!(backend.executed(), vec!["SELECT id, name, score, blob FROM t"]);
    }

    #[tokio::test]
    async fn empty_select_keeps_columns() {
        let backend = ScriptedBackend::default().with_read(
            "SELECT id FROM users WHERE 1 = 0",
            Rowset {
                columns: vec!["id".to_string()],
                rows: Vec::new(),
            },
        );

        let outcome = executor(backend)
            .execute(&1, "SELECT id FROM users WHERE 1 = 0")
            .await
            .expect("query should succeed");
        let QueryOutcome::Read(result) = outcome else {
            panic!("expected read outcome");
        };
        assert_eq!(result.columns(), &["id".to_string()]);
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn write_query_reports_affected_rows_only() {
        let backend = ScriptedBackend::default().with_write(
            "UPDATE users SET active = 0",
            ExecSummary {
                rows_affected: 3,
                last_insert_id: Some(0),
            },
        );

        let outcome = executor(backend)
            .execute(&1, "UPDATE users SET active = 0")
            .await
            .expect("write should succeed");
        assert_eq!(
            outcome,
            QueryOutcome::Write(ExecSummary {
                rows_affected: 3,
                last_insert_id: None,
            })
        );
        assert!(outcome.into_result().is_none());
    }

    #[tokio::test]
    async fn positive_last_insert_id_is_kept() {
        let backend = ScriptedBackend::default().with_write(
            "INSERT INTO users (name) VALUES ('a')",
            ExecSummary {
                rows_affected: 1,
                last_insert_id: Some(41),
            },
        );

        let outcome = executor(backend)
            .execute(&1, "INSERT INTO users (name) VALUES ('a')")
            .await
            .expect("insert should succeed");
        assert!(matches!(
            outcome,
            QueryOutcome::Write(ExecSummary {
                last_insert_id: Some(41),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn backend_errors_keep_their_category() {
        let backend = ScriptedBackend::default().with_read_error(
            "SELECT * FORM users",
            QueryBackendError::new(QueryFailureKind::Syntax, "near 'FORM users'"),
        );
        let executor = executor(backend);

        let err = executor
            .execute(&1, "SELECT * FORM users")
            .await
            .expect_err("syntax error should surface");
        assert_eq!(err, QueryError::Syntax("near 'FORM users'".to_string()));

        let err = executor
            .execute(&1, "SELECT nope FROM missing")
            .await
            .expect_err("unscripted query should fail");
        assert!(matches!(err, QueryError::Execution(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_query_resolves_to_timeout() {
        let backend = ScriptedBackend {
            delay: Some(Duration::from_secs(60)),
            ..ScriptedBackend::default()
        }
        .with_read(
            "SELECT SLEEP(60)",
            Rowset {
                columns: vec!["SLEEP(60)".to_string()],
                rows: vec![vec![CellValue::Integer(0)]],
            },
        );
        let executor = QueryExecutor::new(Arc::new(backend), Duration::from_secs(1));

        let err = executor
            .execute(&1, "SELECT SLEEP(60)")
            .await
            .expect_err("query should time out");
        assert_eq!(err, QueryError::Timeout(Duration::from_secs(1)));
    }
}
