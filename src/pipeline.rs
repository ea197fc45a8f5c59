//! Pipeline manager (§4.7): queue several `Bind`/`Execute` pairs ahead of a
//! `Sync`, then claim their results back in strict FIFO order.
use std::collections::VecDeque;

use crate::{
    error::{Error, Result},
    message::{backend, frontend},
    row::{FromRow, Row},
    sql::Sql,
    statement::{CachedStatements, PortalName, PreparedStatement, StatementName},
    transport::{PgTransport, PgTransportExt},
    value::IntoParams,
};

/// A handle to one queued `exec` call, redeemable via `claim_*` in the
/// order it was issued (§4.7 ordering rule, P6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

struct Entry {
    sql: String,
    needs_describe: bool,
    persistent: bool,
}

/// Open a pipeline scope over `io` (§4.7, §6).
pub fn pipeline<IO: PgTransport + CachedStatements>(io: &mut IO) -> Pipeline<'_, IO> {
    Pipeline::new(io)
}

/// An open pipeline scope over a connection (§4.7).
///
/// Dropping a `Pipeline` with unclaimed tickets silently leaks them on the
/// wire — callers should call [`Pipeline::finish`] to drain and restore
/// Idle before reusing the connection; `finish` is the documented way to
/// end a scope, matching §4.7's "exiting the scope drains any unclaimed
/// tickets" cleanup rule.
pub struct Pipeline<'c, IO> {
    io: &'c mut IO,
    entries: VecDeque<Entry>,
    /// Ticket counts (`entries.len()` at the time) at which a `Sync` was sent;
    /// popped as claims cross each boundary so the matching `ReadyForQuery` is consumed exactly once.
    sync_boundaries: VecDeque<usize>,
    issued: u64,
    claimed: u64,
    consumed: usize,
    aborted: bool,
    first_error: Option<crate::error::DbError>,
}

impl<'c, IO: PgTransport + CachedStatements> Pipeline<'c, IO> {
    pub fn new(io: &'c mut IO) -> Self {
        Self {
            io,
            entries: VecDeque::new(),
            sync_boundaries: VecDeque::new(),
            issued: 0,
            claimed: 0,
            consumed: 0,
            aborted: false,
            first_error: None,
        }
    }

    /// Queue `Bind`+`Execute` for `sql` against `params`, parsing it first on
    /// a cache miss. Returns a [`Ticket`] to claim later. No flush happens here.
    pub fn exec<P: IntoParams>(&mut self, sql: impl Sql, params: P) -> Ticket {
        let persistent = sql.persistent();
        let sql_text = sql.sql();
        let encoded = params.into_params();
        let portal = PortalName::next();

        let (stmt, needs_describe) = match persistent.then(|| self.io.cache_get(sql_text)).flatten() {
            Some(stmt) => (stmt, false),
            None => {
                let oids: Vec<u32> = encoded.iter().map(|p| p.oid).collect();
                let name = if persistent { StatementName::next() } else { StatementName::unnamed() };
                self.io.send(frontend::Parse { statement: &name, sql: sql_text, param_oids: &oids });
                (
                    PreparedStatement { name, sql: sql_text.to_owned(), param_oids: oids, row_description: None },
                    true,
                )
            }
        };

        let values: Vec<_> = encoded.iter().map(|p| frontend::ParamValue(p.bytes.as_deref())).collect();
        self.io.send(frontend::Bind { portal: &portal, statement: &stmt.name, params: &values });
        if needs_describe {
            self.io.send(frontend::Describe(frontend::DescribeTarget::Portal(&portal)));
        }
        self.io.send(frontend::Execute { portal: &portal, max_rows: 0 });

        if needs_describe && persistent {
            self.io.cache_insert(stmt);
        }

        let ticket = Ticket(self.issued);
        self.issued += 1;
        self.entries.push_back(Entry { sql: sql_text.to_owned(), needs_describe, persistent });
        ticket
    }

    /// Flush a `Sync` for every queued-but-unsynced `exec` call.
    pub async fn sync(&mut self) -> Result<()> {
        self.io.send(frontend::Sync);
        self.io.flush().await?;
        self.sync_boundaries.push_back(self.entries.len());
        Ok(())
    }

    /// `claim_one(ticket)`: read this ticket's first row, discarding any
    /// further rows it produced.
    pub async fn claim_one<R: FromRow>(&mut self, ticket: Ticket) -> Result<Option<R>> {
        let rows = self.claim_collect::<R>(ticket).await?;
        Ok(rows.into_iter().next())
    }

    /// `claim_collect(ticket)`: read every row this ticket produced.
    pub async fn claim_collect<R: FromRow>(&mut self, ticket: Ticket) -> Result<Vec<R>> {
        let (rows, _) = self.claim_inner(ticket).await?;
        rows.into_iter().map(|row| row.decode::<R>().map_err(Into::into)).collect()
    }

    /// `claim_drop(ticket)`: discard any rows, return the affected-row count.
    pub async fn claim_drop(&mut self, ticket: Ticket) -> Result<u64> {
        let (_, affected) = self.claim_inner(ticket).await?;
        Ok(affected)
    }

    /// Number of issued tickets not yet claimed.
    pub fn pending_count(&self) -> u64 {
        self.issued - self.claimed
    }

    /// `true` iff an earlier ticket's `ErrorResponse` has poisoned the batch.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Drain every unclaimed ticket, discarding results, and ensure
    /// `ReadyForQuery` has been observed before the scope ends.
    pub async fn finish(mut self) -> Result<()> {
        while self.claimed < self.issued {
            let ticket = Ticket(self.claimed);
            let _ = self.claim_inner(ticket).await;
        }
        Ok(())
    }

    async fn claim_inner(&mut self, ticket: Ticket) -> Result<(Vec<Row>, u64)> {
        if ticket.0 != self.claimed {
            return Err(Error::misuse(format!(
                "claim out of order: expected ticket {}, got {}",
                self.claimed, ticket.0
            )));
        }

        // Auto-sync (§4.7, P9): this ticket's batch was never explicitly synced.
        if self.sync_boundaries.front().is_none_or(|&b| b <= self.consumed) {
            self.sync().await?;
        }

        self.claimed += 1;
        let entry = self.entries.pop_front().expect("claimed index tracks entries 1:1");

        if self.aborted {
            self.maybe_consume_ready_for_query().await;
            let err = self.first_error.clone().expect("aborted implies a stored first_error");
            return Err(Error::pipeline_aborted(format!(
                "pipeline aborted by an earlier failure: {err} (this ticket's result was never produced)"
            )));
        }

        let outcome = self.read_one(&entry).await;
        self.consumed += 1;

        match outcome {
            Ok(result) => {
                self.maybe_consume_ready_for_query().await;
                Ok(result)
            }
            Err(e) => {
                if let crate::error::ErrorKind::Db(db) = e.kind() {
                    self.aborted = true;
                    self.first_error = Some(db.clone());
                    // The transport is now ignoring everything until the
                    // trailing ReadyForQuery (invariant I2); consume it now
                    // so later claims never touch the wire again.
                    let _ = self.io.recv::<backend::ReadyForQuery>().await;
                }
                Err(e)
            }
        }
    }

    async fn read_one(&mut self, entry: &Entry) -> Result<(Vec<Row>, u64)> {
        if entry.needs_describe {
            self.io.recv::<backend::ParseComplete>().await?;
        }
        self.io.recv::<backend::BindComplete>().await?;

        let row_description = if entry.needs_describe {
            let rd = match self.io.recv::<backend::BackendMessage>().await? {
                backend::BackendMessage::RowDescription(rd) => Some(rd.raw),
                backend::BackendMessage::NoData => None,
                other => return Err(other.unexpected("pipeline claim describe")),
            };
            // Back-fill the cache entry `exec` inserted at issue time (with no
            // description yet, since the wire hadn't answered) now that the
            // real one is known, so a later ticket's cache hit sees it too.
            if entry.persistent {
                if let Some(stmt) = self.io.cache_get(&entry.sql) {
                    self.io.cache_insert(PreparedStatement { row_description: rd.clone(), ..stmt });
                }
            }
            rd
        } else {
            // A cache hit at issue time: FIFO claim order guarantees the
            // ticket that originally parsed this statement was claimed (and
            // back-filled the cache) before this one.
            self.io.cache_get(&entry.sql).and_then(|s| s.row_description)
        };

        let mut rows = Vec::new();
        let mut affected = 0;
        loop {
            use backend::BackendMessage::*;
            match self.io.recv().await? {
                DataRow(dr) => {
                    let fields = row_description
                        .clone()
                        .ok_or_else(|| Error::connection_failed("pipeline ticket has no row description"))?;
                    rows.push(Row::new(fields, dr.raw));
                }
                CommandComplete(cmd) => {
                    affected = cmd.rows_affected();
                    break;
                }
                EmptyQueryResponse => break,
                other => return Err(other.unexpected("pipeline claim result")),
            }
        }
        Ok((rows, affected))
    }

    async fn maybe_consume_ready_for_query(&mut self) {
        if self.sync_boundaries.front() == Some(&self.consumed) {
            self.sync_boundaries.pop_front();
            let _ = self.io.recv::<backend::ReadyForQuery>().await;
        }
    }
}
