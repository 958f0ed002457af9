//! Warehouse session client.
//!
//! A [`Connector`] opens one fresh [`Connection`] per call; there is no pool.
//! Callers hold connections through a [`Session`], which guarantees the
//! remote session is closed on every exit path.

use std::time::Duration;

use async_trait::async_trait;

pub mod snowflake;

pub use snowflake::SnowflakeConnector;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("failed to reach warehouse: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("warehouse login rejected ({code}): {message}")]
    Login { code: String, message: String },

    #[error("statement failed ({code}): {message}")]
    Query { code: String, message: String },

    #[error("unexpected warehouse response: {0}")]
    Protocol(String),

    #[error("column {column}: {reason}")]
    Decode { column: usize, reason: String },

    #[error("statement did not finish within {0:?}")]
    Timeout(Duration),

    #[error("session is closed")]
    Closed,
}

/// Positional statement parameter, bound to the `?` placeholders in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Int(i64),
    Text(String),
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Int(value)
    }
}

impl From<i32> for Param {
    fn from(value: i32) -> Self {
        Param::Int(value.into())
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Text(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Text(value)
    }
}

/// One result row. The warehouse ships every cell as text or NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row(pub Vec<Option<String>>);

impl Row {
    fn cell(&self, column: usize) -> Result<&str, DbError> {
        match self.0.get(column) {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(DbError::Decode {
                column,
                reason: "unexpected NULL".to_string(),
            }),
            None => Err(DbError::Decode {
                column,
                reason: format!("row has only {} columns", self.0.len()),
            }),
        }
    }

    pub fn int(&self, column: usize) -> Result<i64, DbError> {
        let raw = self.cell(column)?;
        raw.parse().map_err(|_| DbError::Decode {
            column,
            reason: format!("'{}' is not an integer", raw),
        })
    }

    pub fn text(&self, column: usize) -> Result<String, DbError> {
        self.cell(column).map(str::to_string)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Rows inserted, updated, or deleted by a DML statement; zero for queries.
    pub rows_affected: u64,
}

impl QueryResult {
    pub fn into_first(self) -> Option<Row> {
        self.rows.into_iter().next()
    }
}

/// Opens sessions against the warehouse.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError>;
}

/// A live warehouse session.
#[async_trait]
pub trait Connection: Send {
    async fn query(&mut self, sql: &str, params: &[Param]) -> Result<QueryResult, DbError>;

    /// End the remote session. Must tolerate being called more than once.
    async fn close(&mut self) -> Result<(), DbError>;
}

/// Scoped ownership of one connection.
///
/// Call [`Session::close`] on every path. A session dropped while still open
/// (panic, cancelled request future) closes itself on the current runtime.
pub struct Session {
    conn: Option<Box<dyn Connection>>,
}

impl Session {
    pub async fn open(connector: &dyn Connector) -> Result<Self, DbError> {
        let conn = connector.connect().await?;
        Ok(Self { conn: Some(conn) })
    }

    pub async fn query(&mut self, sql: &str, params: &[Param]) -> Result<QueryResult, DbError> {
        match self.conn.as_mut() {
            Some(conn) => conn.query(sql, params).await,
            None => Err(DbError::Closed),
        }
    }

    /// Close the session. Failures are logged, never returned; the caller
    /// already has its answer by the time it closes.
    pub async fn close(mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(err) = conn.close().await {
                tracing::warn!(error = %err, "failed to close warehouse session");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("closing abandoned warehouse session");
                handle.spawn(async move {
                    if let Err(err) = conn.close().await {
                        tracing::warn!(error = %err, "failed to close abandoned warehouse session");
                    }
                });
            }
            Err(_) => {
                tracing::warn!("warehouse session dropped outside a runtime; left to expire");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    struct CountingConnector(Arc<Counters>);

    struct CountingConnection {
        counters: Arc<Counters>,
        open: bool,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
            self.0.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingConnection {
                counters: Arc::clone(&self.0),
                open: true,
            }))
        }
    }

    #[async_trait]
    impl Connection for CountingConnection {
        async fn query(&mut self, _sql: &str, _params: &[Param]) -> Result<QueryResult, DbError> {
            Ok(QueryResult {
                rows: vec![Row(vec![Some("7".into()), None])],
                ..Default::default()
            })
        }

        async fn close(&mut self) -> Result<(), DbError> {
            if std::mem::take(&mut self.open) {
                self.counters.closed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn explicit_close_releases_once() {
        let counters = Arc::new(Counters::default());
        let connector = CountingConnector(Arc::clone(&counters));

        let mut session = Session::open(&connector).await.unwrap();
        let row = session.query("SELECT 1", &[]).await.unwrap().into_first().unwrap();
        assert_eq!(row.int(0).unwrap(), 7);
        session.close().await;

        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_session_is_closed_in_background() {
        let counters = Arc::new(Counters::default());
        let connector = CountingConnector(Arc::clone(&counters));

        {
            let _session = Session::open(&connector).await.unwrap();
        }
        // Let the spawned close run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn row_accessors_report_bad_cells() {
        let row = Row(vec![Some("12".into()), Some("x".into()), None]);

        assert_eq!(row.int(0).unwrap(), 12);
        assert_eq!(row.text(1).unwrap(), "x");
        assert!(matches!(row.int(1), Err(DbError::Decode { column: 1, .. })));
        assert!(matches!(row.text(2), Err(DbError::Decode { column: 2, .. })));
        assert!(matches!(row.text(3), Err(DbError::Decode { column: 3, .. })));
    }
}
