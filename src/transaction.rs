//! The [`Transaction`] RAII guard (§4.6).
use std::task::{Context, Poll};

use crate::{
    error::{Error, Result},
    message::{backend, frontend, BackendProtocol, FrontendProtocol},
    statement::{CachedStatements, PreparedStatement},
    transport::{PgTransport, PgTransportExt},
};

/// `BEGIN TRANSACTION ISOLATION LEVEL <lvl>`'s `<lvl>` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Open,
    Committed,
    RolledBack,
}

/// An RAII transaction scope (§4.6).
///
/// Obtained via [`crate::phase::begin`] or a connection's `tx()` method.
/// Dropping a `Transaction` that was never committed rolls it back,
/// matching I2: a transaction abandoned mid-scope must never leave the
/// connection in the middle of a query.
///
/// ```no_run
/// # async fn test(mut conn: pyros::Connection) -> pyros::Result<()> {
/// let mut tx = pyros::phase::begin(&mut conn).await?;
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction<IO: PgTransport> {
    io: IO,
    state: TxState,
}

impl<IO: PgTransport> Transaction<IO> {
    pub(crate) fn new(io: IO) -> Self {
        Self { io, state: TxState::Open }
    }

    /// `BEGIN TRANSACTION ISOLATION LEVEL <lvl> [READ ONLY|READ WRITE]`.
    pub(crate) async fn begin_with(mut io: IO, isolation: IsolationLevel, readonly: bool) -> Result<Self> {
        let mode = if readonly { "READ ONLY" } else { "READ WRITE" };
        let sql = format!("BEGIN TRANSACTION ISOLATION LEVEL {} {mode}", isolation.as_sql());
        io.send(frontend::Query { sql: &sql });
        io.flush().await?;
        io.recv::<backend::CommandComplete>().await?;
        let r = io.recv::<backend::ReadyForQuery>().await?;
        if r.tx_status != backend::TxStatus::InTransaction {
            return Err(Error::connection_failed("server did not enter a transaction after BEGIN"));
        }
        Ok(Self::new(io))
    }

    /// Commit the transaction. A second call on an already-terminal
    /// transaction raises [`crate::error::ErrorKind::TransactionClosed`].
    pub async fn commit(mut self) -> Result<()> {
        self.end("COMMIT", TxState::Committed).await
    }

    /// Roll back the transaction explicitly (equivalent to dropping it without committing).
    pub async fn rollback(mut self) -> Result<()> {
        self.end("ROLLBACK", TxState::RolledBack).await
    }

    async fn end(&mut self, sql: &'static str, to: TxState) -> Result<()> {
        if self.state != TxState::Open {
            return Err(crate::error::ErrorKind::TransactionClosed.into());
        }
        self.io.send(frontend::Query { sql });
        self.io.flush().await?;
        self.io.recv::<backend::CommandComplete>().await?;
        let r = self.io.recv::<backend::ReadyForQuery>().await?;
        if r.tx_status != backend::TxStatus::Idle {
            return Err(Error::connection_failed("server did not return to idle after transaction end"));
        }
        self.state = to;
        Ok(())
    }
}

impl<IO: PgTransport> Drop for Transaction<IO> {
    fn drop(&mut self) {
        if self.state == TxState::Open {
            self.io.send(frontend::Query { sql: "ROLLBACK" });
            self.io.ready_request();
        }
    }
}

impl<IO: PgTransport> PgTransport for Transaction<IO> {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<std::io::Result<()>> {
        IO::poll_flush(&mut self.io, cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        IO::poll_recv(&mut self.io, cx)
    }

    fn ready_request(&mut self) {
        IO::ready_request(&mut self.io)
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        IO::send(&mut self.io, message)
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        IO::send_startup(&mut self.io, startup)
    }

    fn server_parameter(&self, name: &str) -> Option<&str> {
        IO::server_parameter(&self.io, name)
    }
}

/// A prepared statement parsed inside a transaction is still just a
/// connection-scoped server object (invariant I3); the cache lives on
/// whatever backs this transaction, same as [`crate::connection::Connection`].
impl<IO: PgTransport + CachedStatements> CachedStatements for Transaction<IO> {
    fn cache_get(&self, sql: &str) -> Option<PreparedStatement> {
        self.io.cache_get(sql)
    }

    fn cache_insert(&mut self, stmt: PreparedStatement) {
        self.io.cache_insert(stmt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{message::backend_tag as tag, transport::{frame, TestConn}};

    fn command_complete(cmd: &str) -> Vec<u8> {
        let mut payload = cmd.as_bytes().to_vec();
        payload.push(0);
        frame(tag::COMMAND_COMPLETE, &payload)
    }

    fn ready(status: u8) -> Vec<u8> {
        frame(tag::READY_FOR_QUERY, &[status])
    }

    #[test]
    fn begin_with_requires_in_transaction_status() {
        let mut script = command_complete("BEGIN");
        script.extend(ready(b'T'));
        script.extend(command_complete("COMMIT"));
        script.extend(ready(b'I'));

        let conn = TestConn::new(script);
        let tx = crate::block_on(Transaction::begin_with(conn, IsolationLevel::default(), false)).unwrap();
        crate::block_on(tx.commit()).unwrap();
    }

    #[test]
    fn begin_with_rejects_a_server_that_never_enters_a_transaction() {
        let mut script = command_complete("BEGIN");
        script.extend(ready(b'I'));

        let conn = TestConn::new(script);
        let err = crate::block_on(Transaction::begin_with(conn, IsolationLevel::default(), false)).unwrap_err();
        assert!(matches!(err.kind(), crate::error::ErrorKind::ConnectionFailed(_)));
    }

    #[test]
    fn rollback_requires_idle_status_and_ending_twice_is_an_error() {
        let mut script = command_complete("BEGIN");
        script.extend(ready(b'T'));
        script.extend(command_complete("ROLLBACK"));
        script.extend(ready(b'I'));

        let conn = TestConn::new(script);
        let mut tx = crate::block_on(Transaction::begin_with(conn, IsolationLevel::default(), false)).unwrap();
        crate::block_on(tx.end("ROLLBACK", TxState::RolledBack)).unwrap();
        let err = crate::block_on(tx.end("ROLLBACK", TxState::RolledBack)).unwrap_err();
        assert!(matches!(err.kind(), crate::error::ErrorKind::TransactionClosed));
    }
}
