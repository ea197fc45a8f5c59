//! Portal streaming inside an open transaction (§4.5).
use bytes::Bytes;

use crate::{
    error::{Error, Result},
    message::{backend, frontend},
    row::{FromRow, Row},
    sql::Sql,
    statement::{CachedStatements, PortalName, PreparedStatement, StatementName},
    transaction::Transaction,
    transport::{PgTransport, PgTransportExt},
    value::IntoParams,
};

/// A server-side cursor bound to one [`Transaction`] (§4.5).
///
/// Obtained via [`exec_portal`]. Once the owning transaction commits or
/// rolls back every further call on an outstanding `Portal` fails with
/// `MisuseError`, since the server has already discarded it.
pub struct Portal<'tx, IO: PgTransport> {
    tx: &'tx mut Transaction<IO>,
    name: PortalName,
    row_description: Option<Bytes>,
    closed: bool,
}

impl<'tx, IO: PgTransport + CachedStatements> Portal<'tx, IO> {
    /// `exec_collect(limit)`: `Execute(portal, limit)` + `Flush`, reading
    /// `DataRow`s until either `limit` rows are produced (`PortalSuspended`)
    /// or the cursor completes (`CommandComplete`). `limit = 0` fetches
    /// everything and guarantees `has_more == false`.
    pub async fn exec_collect<R: FromRow>(&mut self, limit: u32) -> Result<(Vec<R>, bool)> {
        self.check_open()?;
        self.tx.send(frontend::Execute { portal: &self.name, max_rows: limit as i32 });
        self.tx.send(frontend::Flush);
        self.tx.flush().await?;

        let mut rows = Vec::new();
        let has_more = loop {
            use backend::BackendMessage::*;
            match self.tx.recv().await? {
                DataRow(dr) => {
                    let fields = self
                        .row_description
                        .clone()
                        .ok_or_else(|| Error::connection_failed("portal carries no row description"))?;
                    rows.push(Row::new(fields, dr.raw).decode::<R>()?);
                }
                CommandComplete(_) | EmptyQueryResponse => break false,
                PortalSuspended => break true,
                other => return Err(other.unexpected("portal exec_collect")),
            }
        };
        Ok((rows, has_more))
    }

    /// Close the portal explicitly: `Close(portal)` + `Flush`, reading `CloseComplete`.
    pub async fn close(mut self) -> Result<()> {
        self.check_open()?;
        self.tx.send(frontend::ClosePortal(&self.name));
        self.tx.send(frontend::Flush);
        self.tx.flush().await?;
        self.tx.recv::<backend::CloseComplete>().await?;
        self.closed = true;
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::misuse("portal used after close()"));
        }
        Ok(())
    }
}

/// `exec_portal(sql, params)`: parse `sql` if not cached, bind to a freshly
/// named portal, and hand back a handle without issuing `Execute` (§4.5).
/// Only callable inside an open [`Transaction`].
pub async fn exec_portal<'tx, P, IO>(
    sql: impl Sql,
    params: P,
    tx: &'tx mut Transaction<IO>,
) -> Result<Portal<'tx, IO>>
where
    P: IntoParams,
    IO: PgTransport + CachedStatements,
{
    let persistent = sql.persistent();
    let sql_text = sql.sql();
    let encoded = params.into_params();
    let portal = PortalName::next();

    let (stmt, needs_describe) = match persistent.then(|| tx.cache_get(sql_text)).flatten() {
        Some(stmt) => (stmt, false),
        None => {
            let oids: Vec<u32> = encoded.iter().map(|p| p.oid).collect();
            let name = if persistent { StatementName::next() } else { StatementName::unnamed() };
            tx.send(frontend::Parse { statement: &name, sql: sql_text, param_oids: &oids });
            (
                PreparedStatement { name, sql: sql_text.to_owned(), param_oids: oids, row_description: None },
                true,
            )
        }
    };

    let values: Vec<_> = encoded.iter().map(|p| frontend::ParamValue(p.bytes.as_deref())).collect();
    tx.send(frontend::Bind { portal: &portal, statement: &stmt.name, params: &values });
    tx.send(frontend::Describe(frontend::DescribeTarget::Portal(&portal)));
    tx.send(frontend::Flush);
    tx.flush().await?;

    if needs_describe {
        tx.recv::<backend::ParseComplete>().await?;
    }
    tx.recv::<backend::BindComplete>().await?;
    let row_description = match tx.recv::<backend::BackendMessage>().await? {
        backend::BackendMessage::RowDescription(rd) => Some(rd.raw),
        backend::BackendMessage::NoData => None,
        other => return Err(other.unexpected("exec_portal describe")),
    };

    if needs_describe && persistent {
        tx.cache_insert(PreparedStatement { row_description: row_description.clone(), ..stmt });
    }

    Ok(Portal { tx, name: portal, row_description, closed: false })
}

/// `exec_iter(sql, params, callback)`: open an implicit transaction, hand
/// `callback` a [`Portal`], and commit or roll back on normal/error return.
pub async fn exec_iter<Exec, P, F, Fut, T>(exec: Exec, sql: impl Sql, params: P, callback: F) -> Result<T>
where
    Exec: crate::executor::Executor,
    Exec::Transport: CachedStatements,
    P: IntoParams,
    F: FnOnce(Portal<'_, Exec::Transport>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut tx = crate::phase::begin(exec).await?;
    let portal = exec_portal(sql, params, &mut tx).await?;
    match callback(portal).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            tx.rollback().await?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::backend_tag as tag,
        transport::{data_row, frame, row_description, TestConn},
    };

    fn command_complete(cmd: &str) -> Vec<u8> {
        let mut payload = cmd.as_bytes().to_vec();
        payload.push(0);
        frame(tag::COMMAND_COMPLETE, &payload)
    }

    #[test]
    fn exec_portal_streams_then_closes() {
        let mut script = frame(tag::PARSE_COMPLETE, &[]);
        script.extend(frame(tag::BIND_COMPLETE, &[]));
        script.extend(frame(tag::ROW_DESCRIPTION, &row_description(&[("n", crate::value::oid::INT4)])));
        script.extend(frame(tag::DATA_ROW, &data_row(&[Some(&1i32.to_be_bytes())])));
        script.extend(frame(tag::PORTAL_SUSPENDED, &[]));
        script.extend(frame(tag::DATA_ROW, &data_row(&[Some(&2i32.to_be_bytes())])));
        script.extend(command_complete("FETCH 1"));
        script.extend(frame(tag::CLOSE_COMPLETE, &[]));

        let mut tx = Transaction::new(TestConn::new(script));
        let mut portal = crate::block_on(exec_portal("select n from t", (), &mut tx)).unwrap();

        let (first, more): (Vec<(i32,)>, bool) = crate::block_on(portal.exec_collect(1)).unwrap();
        assert_eq!(first, vec![(1,)]);
        assert!(more);

        let (rest, more): (Vec<(i32,)>, bool) = crate::block_on(portal.exec_collect(0)).unwrap();
        assert_eq!(rest, vec![(2,)]);
        assert!(!more);

        crate::block_on(portal.close()).unwrap();
    }

    #[test]
    fn portal_use_after_close_is_misuse() {
        let script = frame(tag::CLOSE_COMPLETE, &[]);
        let mut tx = Transaction::new(TestConn::new(script));
        let portal = Portal { tx: &mut tx, name: crate::statement::PortalName::unnamed(), row_description: None, closed: true };
        let err = crate::block_on(async { portal.close().await });
        assert!(matches!(err, Err(e) if matches!(e.kind(), crate::error::ErrorKind::Misuse(_))));
    }
}
