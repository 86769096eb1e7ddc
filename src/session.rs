//! Database sessions used by the copy protocol and restore.
//!
//! Everything that talks to the cluster goes through the `Session` trait so a
//! run can be driven against a live server (`PgSessionFactory`) or an in-test
//! double. Each worker owns its own session.

use futures_util::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, warn};

/// Error text reported by the server or the client library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SessionError(pub String);

impl SessionError {
    pub fn new(msg: impl Into<String>) -> Self { SessionError(msg.into()) }
}

impl From<tokio_postgres::Error> for SessionError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db) => SessionError(format!("{}: {}", db.severity(), db.message())),
            None => SessionError(err.to_string()),
        }
    }
}

pub trait Session: Send + Sync {
    /// Run one statement and return the affected row count.
    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<u64, SessionError>>;

    /// Run a query and return the first column of the first row.
    fn query_scalar<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Option<String>, SessionError>>;

    /// Ask the server to stop whatever statement this session is running.
    fn cancel(&self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async { Ok(()) })
    }
}

pub trait SessionFactory: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Session>, SessionError>>;
}

/// Opens `tokio-postgres` connections to the coordinator.
#[derive(Clone)]
pub struct PgSessionFactory {
    cfg: tokio_postgres::Config,
    search_path: Option<String>,
}

impl PgSessionFactory {
    pub fn new(url: &str, search_path: Option<String>) -> Result<Self, SessionError> {
        let cfg: tokio_postgres::Config = url.parse().map_err(|e| SessionError(format!("invalid postgres url: {}", e)))?;
        Ok(Self { cfg, search_path })
    }
}

impl SessionFactory for PgSessionFactory {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Session>, SessionError>> {
        Box::pin(async move {
            let (client, conn) = self.cfg.connect(tokio_postgres::NoTls).await?;
            // drive the connection in background
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    warn!(target: "segbackup::session", "connection closed with error: {}", e);
                }
            });
            if let Some(s) = &self.search_path {
                client.simple_query(&format!("SET search_path TO {}", s)).await?;
            }
            debug!(target: "segbackup::session", "session opened");
            Ok(Box::new(PgSession { client }) as Box<dyn Session>)
        })
    }
}

pub struct PgSession {
    client: tokio_postgres::Client,
}

impl Session for PgSession {
    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<u64, SessionError>> {
        Box::pin(async move {
            use tokio_postgres::SimpleQueryMessage;
            let msgs = self.client.simple_query(sql).await?;
            let rows = msgs
                .iter()
                .filter_map(|m| match m {
                    SimpleQueryMessage::CommandComplete(n) => Some(*n),
                    _ => None,
                })
                .last()
                .unwrap_or(0);
            Ok(rows)
        })
    }

    fn query_scalar<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Option<String>, SessionError>> {
        Box::pin(async move {
            use tokio_postgres::SimpleQueryMessage;
            let msgs = self.client.simple_query(sql).await?;
            for m in msgs {
                if let SimpleQueryMessage::Row(r) = m {
                    return Ok(r.get(0).map(|s| s.to_string()));
                }
            }
            Ok(None)
        })
    }

    fn cancel(&self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move {
            // the cancel request travels on its own connection
            self.client.cancel_token().cancel_query(tokio_postgres::NoTls).await?;
            debug!(target: "segbackup::session", "cancel request sent");
            Ok(())
        })
    }
}
