use std::io;

use async_trait::async_trait;
use boba_core::config::ConnectionConfig;
use boba_core::connection_manager::{BackendError, ConnectFailureKind, ConnectionBackend};
use boba_core::query_executor::{
    ExecSummary, QueryBackend, QueryBackendError, QueryFailureKind, Rowset,
};
use boba_core::value::CellValue;
use mysql_async::prelude::Queryable;
use mysql_async::{IoError, OptsBuilder, Pool, Row, Value};

const ER_DBACCESS_DENIED: u16 = 1044;
const ER_ACCESS_DENIED: u16 = 1045;
const ER_PARSE_ERROR: u16 = 1064;

/// MySQL through a `mysql_async` pool. The pool is the session handle: cloning
/// it is cheap and lets queries run off the event loop.
#[derive(Debug, Clone, Default)]
pub struct MysqlBackend;

#[async_trait]
impl ConnectionBackend for MysqlBackend {
    type Connection = Pool;

    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Connection, BackendError> {
        let pool = Pool::new(opts_from_config(config));
        match pool.get_conn().await {
            Ok(conn) => {
                drop(conn);
                Ok(pool)
            }
            Err(error) => {
                if let Err(cleanup) = pool.disconnect().await {
                    tracing::debug!(error = %cleanup, "pool cleanup after failed connect");
                }
                Err(to_connection_error(error))
            }
        }
    }

    async fn ping(&self, connection: &Self::Connection) -> Result<(), BackendError> {
        let mut conn = connection.get_conn().await.map_err(to_connection_error)?;
        conn.ping().await.map_err(to_connection_error)
    }

    async fn disconnect(&self, connection: Self::Connection) -> Result<(), BackendError> {
        tracing::debug!("disconnecting mysql pool");
        connection.disconnect().await.map_err(to_connection_error)
    }
}

#[async_trait]
impl QueryBackend for MysqlBackend {
    async fn query(&self, connection: &Self::Connection, sql: &str) -> Result<Rowset, QueryBackendError> {
        let mut conn = connection.get_conn().await.map_err(to_query_error)?;
        let mut result = conn.query_iter(sql).await.map_err(to_query_error)?;
        let columns = result.columns().ok_or_else(|| {
            QueryBackendError::new(
                QueryFailureKind::ColumnIntrospection,
                "statement did not return a result set",
            )
        })?;
        let columns = columns
            .iter()
            .map(|column| column.name_str().into_owned())
            .collect();

        let rows = result
            .collect::<Row>()
            .await
            .map_err(to_query_error)?
            .into_iter()
            .map(|row| row.unwrap().into_iter().map(cell_from_mysql).collect())
            .collect();

        Ok(Rowset { columns, rows })
    }

    async fn exec(&self, connection: &Self::Connection, sql: &str) -> Result<ExecSummary, QueryBackendError> {
        let mut conn = connection.get_conn().await.map_err(to_query_error)?;
        conn.query_drop(sql).await.map_err(to_query_error)?;
        Ok(ExecSummary {
            rows_affected: conn.affected_rows(),
            last_insert_id: conn.last_insert_id(),
        })
    }
}

fn opts_from_config(config: &ConnectionConfig) -> OptsBuilder {
    OptsBuilder::default()
        .ip_or_hostname(config.host.clone())
        .tcp_port(config.port)
        .user(Some(config.user.clone()))
        .pass(config.password.clone())
        .db_name(Some(config.database.clone()))
}

/// Resolves a driver value into the closed cell union. Text-protocol results
/// arrive as bytes, so numbers mostly land in `Text` with their server form.
pub(crate) fn cell_from_mysql(value: Value) -> CellValue {
    match value {
        Value::NULL => CellValue::Null,
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => CellValue::Text(text),
            Err(error) => CellValue::Binary(error.into_bytes()),
        },
        Value::Int(value) => CellValue::Integer(i128::from(value)),
        Value::UInt(value) => CellValue::Integer(i128::from(value)),
        Value::Float(value) => CellValue::Float(
            value
                .to_string()
                .parse::<f64>()
                .unwrap_or_else(|_| f64::from(value)),
        ),
        Value::Double(value) => CellValue::Float(value),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let mut text = format!("{year:04}-{month:02}-{day:02}");
            if hour != 0 || minute != 0 || second != 0 || micros != 0 {
                text.push_str(&format!(" {hour:02}:{minute:02}:{second:02}"));
                push_micros(&mut text, micros);
            }
            CellValue::Text(text)
        }
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            let hours = u64::from(days) * 24 + u64::from(hours);
            let mut text = format!("{sign}{hours:02}:{minutes:02}:{seconds:02}");
            push_micros(&mut text, micros);
            CellValue::Text(text)
        }
    }
}

fn push_micros(text: &mut String, micros: u32) {
    if micros != 0 {
        text.push_str(&format!(".{micros:06}"));
    }
}

fn is_timeout(error: &mysql_async::Error) -> bool {
    matches!(error, mysql_async::Error::Io(IoError::Io(io)) if io.kind() == io::ErrorKind::TimedOut)
}

pub(crate) fn to_connection_error(error: mysql_async::Error) -> BackendError {
    let kind = match &error {
        mysql_async::Error::Server(server)
            if matches!(server.code, ER_ACCESS_DENIED | ER_DBACCESS_DENIED) =>
        {
            ConnectFailureKind::AuthFailed
        }
        other if is_timeout(other) => ConnectFailureKind::Timeout,
        _ => ConnectFailureKind::Refused,
    };
    BackendError::new(kind, error.to_string())
}

pub(crate) fn to_query_error(error: mysql_async::Error) -> QueryBackendError {
    let kind = match &error {
        mysql_async::Error::Server(server) if server.code == ER_PARSE_ERROR => {
            QueryFailureKind::Syntax
        }
        _ => QueryFailureKind::Execution,
    };
    QueryBackendError::new(kind, error.to_string())
}
