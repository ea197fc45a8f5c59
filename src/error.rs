//! `pyros` error types.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    config::ParseError,
    message::{backend::ErrorFields, ProtocolError},
    row::DecodeError,
};

/// A specialized [`Result`] for `pyros` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible errors from the `pyros` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Attach a short description of the operation that produced this error.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// `true` for the errors §7 designates fatal to the connection.
    pub fn is_connection_broken(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ConnectionFailed(_) | ErrorKind::ConnectionClosed(_) | ErrorKind::Io(_)
        )
    }
}

/// Error kinds, mirroring the taxonomy of §7.
pub enum ErrorKind {
    /// TCP/TLS failure, startup rejection, or auth failure. Fatal.
    ConnectionFailed(String),
    /// Operation attempted after `close()` or after a fatal error.
    ConnectionClosed(ConnectionClosedError),
    /// Backend `ErrorResponse`. Recoverable once `ReadyForQuery` is observed.
    Db(DbError),
    /// Parameter or column OID not present in the value codec table.
    UnsupportedType(String),
    /// API usage that violates the connection state machine.
    Misuse(String),
    /// `commit`/`rollback` called after the transaction already reached a terminal state.
    TransactionClosed,
    /// Claim attempted on a pipeline ticket poisoned by an earlier failure.
    PipelineAborted(String),
    Config(ParseError),
    Protocol(ProtocolError),
    Io(io::Error),
    Utf8(std::str::Utf8Error),
    Decode(DecodeError),
}

/// A backend-reported SQL error.
#[derive(Debug, Clone)]
pub struct DbError {
    pub code: String,
    pub severity: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl From<ErrorFields> for DbError {
    fn from(f: ErrorFields) -> Self {
        Self { code: f.code, severity: f.severity, message: f.message, detail: f.detail, hint: f.hint }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.severity, self.code, self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

crate::common::unit_error! {
    /// Operation attempted on a connection that has already been closed.
    pub struct ConnectionClosedError("connection is closed");
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<std::io::Error>e => ErrorKind::Io(e));
from!(<DbError>e => ErrorKind::Db(e));
from!(<std::str::Utf8Error>e => ErrorKind::Utf8(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<ConnectionClosedError>_e => ErrorKind::ConnectionClosed(_e));

impl Error {
    pub fn misuse(msg: impl Into<String>) -> Self {
        ErrorKind::Misuse(msg.into()).into()
    }

    pub fn pipeline_aborted(msg: impl Into<String>) -> Self {
        ErrorKind::PipelineAborted(msg.into()).into()
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        ErrorKind::ConnectionFailed(msg.into()).into()
    }

    pub fn unsupported_type(oid: u32) -> Self {
        ErrorKind::UnsupportedType(format!("unsupported type oid {oid}")).into()
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }
        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\nStack backtrace:\n")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{backtrace}")?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed(e) => write!(f, "connection failed: {e}"),
            Self::ConnectionClosed(e) => e.fmt(f),
            Self::Db(e) => e.fmt(f),
            Self::UnsupportedType(e) => write!(f, "{e}"),
            Self::Misuse(e) => write!(f, "misuse: {e}"),
            Self::TransactionClosed => write!(f, "transaction already committed or rolled back"),
            Self::PipelineAborted(e) => write!(f, "{e}"),
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_connection_broken_matches_only_the_fatal_kinds() {
        assert!(Error::connection_failed("refused").is_connection_broken());
        assert!(Error::from(ConnectionClosedError).is_connection_broken());
        assert!(Error::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).is_connection_broken());
        assert!(!Error::misuse("bad call").is_connection_broken());
        assert!(!err(ErrorKind::TransactionClosed).is_connection_broken());
    }

    fn err(kind: ErrorKind) -> Error {
        kind.into()
    }

    #[test]
    fn context_is_prefixed_onto_the_display_output() {
        let e = err(ErrorKind::TransactionClosed).context("commit");
        assert_eq!(e.to_string().lines().next().unwrap(), "commit: transaction already committed or rolled back");
    }

    #[test]
    fn db_error_display_includes_detail_and_hint_when_present() {
        let db = DbError {
            code: "23505".into(),
            severity: "ERROR".into(),
            message: "duplicate key".into(),
            detail: Some("Key (id)=(1) already exists.".into()),
            hint: None,
        };
        let rendered = db.to_string();
        assert!(rendered.starts_with("ERROR (23505): duplicate key"));
        assert!(rendered.contains("DETAIL: Key (id)=(1) already exists."));
        assert!(!rendered.contains("HINT"));
    }

    #[test]
    fn constructors_produce_the_expected_kind() {
        assert!(matches!(Error::misuse("x").kind(), ErrorKind::Misuse(m) if m == "x"));
        assert!(matches!(Error::pipeline_aborted("x").kind(), ErrorKind::PipelineAborted(m) if m == "x"));
        assert!(matches!(Error::unsupported_type(99).kind(), ErrorKind::UnsupportedType(m) if m.contains("99")));
    }
}
