//! Postgres wire-protocol client.
//!
//! # Examples
//!
//! ```no_run
//! use pyros::Connection;
//!
//! # fn app() -> pyros::Result<()> {
//! let mut conn = Connection::connect_env()?;
//! pyros::block_on(conn.ping())?;
//! # Ok(())
//! # }
//! ```

pub mod common;
mod auth;
pub mod config;
pub mod message;
mod ext;

// Encoding
mod value;
pub mod row;

// Component
pub mod statement;

// Operation
pub mod transport;
pub mod executor;
pub mod phase;
pub mod transaction;
pub mod portal;
pub mod pipeline;
pub mod query;
pub mod sql;

// Connection
pub mod connection;
pub mod tls;

mod error;

pub use config::Config;
pub use connection::Connection;
pub use error::{Error, ErrorKind, Result};
pub use executor::Executor;
pub use pipeline::Pipeline;
pub use portal::Portal;
pub use row::{DecodeError, FromRow, Row};
pub use sql::{Sql, SqlExt};
pub use statement::CachedStatements;
pub use transaction::{IsolationLevel, Transaction};
pub use value::{Encode, IntoParams, Oid, PgType};
#[cfg(feature = "json")]
pub use value::Json;

#[doc(inline)]
pub use query::{exec, exec_batch, exec_drop, exec_first, query, query_drop, query_first};

/// Drive a future to completion on the current thread without a runtime.
///
/// [`crate::transport::BlockingIo`] never truly suspends: its `poll_recv`
/// either has a full message buffered already or blocks the underlying
/// `Read` call directly, so it always resolves on the first poll. That
/// makes a real executor unnecessary on the blocking surface — a no-op
/// waker is enough, since nothing ever calls `wake()`. Every `Connection`
/// method that touches the wire is `async`; callers on the blocking surface
/// drive them with this instead of pulling in a runtime.
pub fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    use std::task::{Context, Poll, Waker};

    let mut fut = std::pin::pin!(fut);
    let waker = Waker::noop();
    let mut cx = Context::from_waker(waker);
    loop {
        if let Poll::Ready(out) = fut.as_mut().poll(&mut cx) {
            return out;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_on_resolves_an_already_ready_future() {
        assert_eq!(block_on(async { 1 + 1 }), 2);
    }

    #[test]
    fn block_on_polls_a_future_that_is_pending_once() {
        use std::task::Poll;

        struct PendingOnce(bool);
        impl std::future::Future for PendingOnce {
            type Output = &'static str;
            fn poll(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context) -> Poll<Self::Output> {
                if self.0 {
                    Poll::Ready("done")
                } else {
                    self.0 = true;
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            }
        }

        assert_eq!(block_on(PendingOnce(false)), "done");
    }
}
