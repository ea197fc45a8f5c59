//! Server-side statement and portal name generation.
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque, monotonically assigned server-side object name.
///
/// Per invariant I5 the counter is process-wide and never wraps in practice;
/// `"pyros_"` is the literal prefix §4.3 mandates for prepared statements and
/// is reused for portals so both namespaces read the same way in server logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Id(String);

impl Id {
    fn unnamed() -> Self {
        Self(String::new())
    }

    fn next(counter: &AtomicU64, prefix: &str) -> Self {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let mut buf = itoa::Buffer::new();
        Self(format!("{prefix}{}", buf.format(n)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unnamed(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.0).finish()
    }
}

macro_rules! delegate {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, PartialEq, Eq, Hash)]
        pub struct $name(Id);

        impl $name {
            pub(crate) fn unnamed() -> Self {
                Self(Id::unnamed())
            }

            pub(crate) fn next() -> Self {
                static COUNTER: AtomicU64 = AtomicU64::new(0);
                Self(Id::next(&COUNTER, $prefix))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }

            pub fn is_unnamed(&self) -> bool {
                self.0.is_unnamed()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.0.as_str()).finish()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.0.as_str())
            }
        }
    };
}

delegate!(StatementName, "pyros_");
delegate!(PortalName, "pyros_portal_");

/// The server's description of a parsed statement, cached per connection.
#[derive(Clone)]
pub struct PreparedStatement {
    pub name: StatementName,
    pub sql: String,
    pub param_oids: Vec<u32>,
    pub row_description: Option<bytes::Bytes>,
}

/// Cache access for anything that can execute prepared statements.
///
/// Split out from [`crate::transport::PgTransport`] (the teacher keeps
/// `get_stmt`/`add_stmt` directly on its transport trait): here the cache
/// lives on [`crate::connection::Connection`] instead, since statement names
/// are only ever meaningful together with the one connection that parsed
/// them (invariant I3).
pub trait CachedStatements {
    fn cache_get(&self, sql: &str) -> Option<PreparedStatement>;
    fn cache_insert(&mut self, stmt: PreparedStatement);
}

impl<P: CachedStatements> CachedStatements for &mut P {
    fn cache_get(&self, sql: &str) -> Option<PreparedStatement> {
        P::cache_get(self, sql)
    }

    fn cache_insert(&mut self, stmt: PreparedStatement) {
        P::cache_insert(self, stmt);
    }
}

/// Maps SQL text to its server-side prepared form.
///
/// Per §9's open question, entries are never evicted within a connection's
/// lifetime — a bounded-LRU variant would need to emit `Close(statement)`
/// before evicting, which this implementation does not attempt.
#[derive(Default)]
pub struct StatementCache {
    entries: std::collections::HashMap<String, PreparedStatement>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sql: &str) -> Option<&PreparedStatement> {
        self.entries.get(sql)
    }

    pub fn insert(&mut self, stmt: PreparedStatement) {
        self.entries.insert(stmt.sql.clone(), stmt);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
