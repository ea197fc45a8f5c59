//! Caller-facing query surface (§4.4): simple queries (no parameters, text
//! protocol) and extended queries (bound parameters, parse/bind/execute),
//! both built directly on [`PgTransport`] plus the statement cache.
use bytes::Bytes;

use crate::{
    error::{Error, Result},
    message::{backend, frontend},
    row::{FromRow, Row},
    sql::Sql,
    statement::{CachedStatements, PortalName, PreparedStatement, StatementName},
    transport::{PgTransport, PgTransportExt},
    value::IntoParams,
};

/// `query(sql)`: send the SQL as-is via the simple-query protocol and decode
/// every row of the first result set.
pub async fn query<R: FromRow>(sql: impl Sql, io: &mut impl PgTransport) -> Result<Vec<R>> {
    let (rows, _) = simple(sql.sql(), io).await?;
    rows.into_iter().map(|row| row.decode::<R>().map_err(Into::into)).collect()
}

/// `query_first(sql)`: like [`query`] but keeps only the first row, still
/// draining the rest of the result set so the connection returns to Idle.
pub async fn query_first<R: FromRow>(sql: impl Sql, io: &mut impl PgTransport) -> Result<Option<R>> {
    let (rows, _) = simple(sql.sql(), io).await?;
    rows.into_iter().next().map(Row::decode::<R>).transpose().map_err(Into::into)
}

/// `query_drop(sql)`: discard any rows, return the command tag's row count.
pub async fn query_drop(sql: impl Sql, io: &mut impl PgTransport) -> Result<u64> {
    let (_, affected) = simple(sql.sql(), io).await?;
    Ok(affected)
}

async fn simple(sql: &str, io: &mut impl PgTransport) -> Result<(Vec<Row>, u64)> {
    io.send(frontend::Query { sql });
    io.flush().await?;

    let mut row_description: Option<Bytes> = None;
    let mut rows = Vec::new();
    let mut affected = 0;

    loop {
        use backend::BackendMessage::*;
        match io.recv().await? {
            RowDescription(rd) => row_description = Some(rd.raw),
            DataRow(dr) => {
                let fields = row_description
                    .clone()
                    .ok_or_else(|| Error::connection_failed("server sent DataRow before RowDescription"))?;
                rows.push(Row::new(fields, dr.raw));
            }
            CommandComplete(cmd) => affected = cmd.rows_affected(),
            EmptyQueryResponse => {}
            ReadyForQuery(_) => break,
            other => return Err(other.unexpected("simple query")),
        }
    }

    Ok((rows, affected))
}

/// `exec(sql, params)`: bind `params` against `sql` (parsing it once per
/// connection, §4.3) and decode every returned row.
pub async fn exec<P: IntoParams, R: FromRow>(
    sql: impl Sql,
    params: P,
    io: &mut (impl PgTransport + CachedStatements),
) -> Result<Vec<R>> {
    let (rows, _) = extended(sql, params, io).await?;
    rows.into_iter().map(|row| row.decode::<R>().map_err(Into::into)).collect()
}

/// `exec_first(sql, params)`: like [`exec`] but keeps only the first row.
pub async fn exec_first<P: IntoParams, R: FromRow>(
    sql: impl Sql,
    params: P,
    io: &mut (impl PgTransport + CachedStatements),
) -> Result<Option<R>> {
    let (rows, _) = extended(sql, params, io).await?;
    rows.into_iter().next().map(Row::decode::<R>).transpose().map_err(Into::into)
}

/// `exec_drop(sql, params)`: discard any rows, return the affected-row count.
pub async fn exec_drop<P: IntoParams>(
    sql: impl Sql,
    params: P,
    io: &mut (impl PgTransport + CachedStatements),
) -> Result<u64> {
    let (_, affected) = extended(sql, params, io).await?;
    Ok(affected)
}

/// `exec_batch(sql, batch)`: Bind/Execute `sql` once per entry of `batch`
/// against a single cached statement, terminated by one final Sync. An
/// empty batch sends nothing (§4.4).
pub async fn exec_batch<P: IntoParams>(
    sql: impl Sql,
    batch: Vec<P>,
    io: &mut (impl PgTransport + CachedStatements),
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let sql = sql.sql();

    let stmt = match io.cache_get(sql) {
        Some(s) => s,
        None => {
            let oids: Vec<u32> = Vec::new();
            let name = StatementName::next();
            io.send(frontend::Parse { statement: &name, sql, param_oids: &oids });
            io.send(frontend::Flush);
            io.flush().await?;
            io.recv::<backend::ParseComplete>().await?;
            let stmt = PreparedStatement { name, sql: sql.to_owned(), param_oids: oids, row_description: None };
            io.cache_insert(stmt.clone());
            stmt
        }
    };

    for params in batch {
        let portal = PortalName::unnamed();
        let encoded = params.into_params();
        let values: Vec<_> = encoded.iter().map(|p| frontend::ParamValue(p.bytes.as_deref())).collect();
        io.send(frontend::Bind { portal: &portal, statement: &stmt.name, params: &values });
        io.send(frontend::Execute { portal: &portal, max_rows: 0 });
    }
    io.send(frontend::Sync);
    io.flush().await?;

    loop {
        use backend::BackendMessage::*;
        match io.recv().await? {
            ReadyForQuery(_) => break,
            BindComplete | DataRow(_) | CommandComplete(_) | EmptyQueryResponse => {}
            other => return Err(other.unexpected("exec_batch")),
        }
    }
    Ok(())
}

async fn extended<P: IntoParams>(
    sql: impl Sql,
    params: P,
    io: &mut (impl PgTransport + CachedStatements),
) -> Result<(Vec<Row>, u64)> {
    let persistent = sql.persistent();
    let sql = sql.sql();
    let encoded = params.into_params();
    let portal = PortalName::unnamed();

    let (stmt, needs_describe) = match persistent.then(|| io.cache_get(sql)).flatten() {
        Some(stmt) => (stmt, false),
        None => {
            let oids: Vec<u32> = encoded.iter().map(|p| p.oid).collect();
            let name = if persistent { StatementName::next() } else { StatementName::unnamed() };
            io.send(frontend::Parse { statement: &name, sql, param_oids: &oids });
            (PreparedStatement { name, sql: sql.to_owned(), param_oids: oids, row_description: None }, true)
        }
    };

    let values: Vec<_> = encoded.iter().map(|p| frontend::ParamValue(p.bytes.as_deref())).collect();
    io.send(frontend::Bind { portal: &portal, statement: &stmt.name, params: &values });
    if needs_describe {
        io.send(frontend::Describe(frontend::DescribeTarget::Portal(&portal)));
    }
    io.send(frontend::Execute { portal: &portal, max_rows: 0 });
    io.send(frontend::Sync);
    io.flush().await?;

    if needs_describe {
        io.recv::<backend::ParseComplete>().await?;
    }
    io.recv::<backend::BindComplete>().await?;

    let row_description = if needs_describe {
        match io.recv::<backend::BackendMessage>().await? {
            backend::BackendMessage::RowDescription(rd) => Some(rd.raw),
            backend::BackendMessage::NoData => None,
            other => return Err(other.unexpected("exec describe")),
        }
    } else {
        stmt.row_description.clone()
    };

    let mut rows = Vec::new();
    let mut affected = 0;
    loop {
        use backend::BackendMessage::*;
        match io.recv().await? {
            DataRow(dr) => {
                let fields = row_description
                    .clone()
                    .ok_or_else(|| Error::connection_failed("server sent DataRow with NoData description"))?;
                rows.push(Row::new(fields, dr.raw));
            }
            CommandComplete(cmd) => {
                affected = cmd.rows_affected();
                break;
            }
            EmptyQueryResponse => break,
            other => return Err(other.unexpected("exec result")),
        }
    }
    io.recv::<backend::ReadyForQuery>().await?;

    if needs_describe && persistent {
        io.cache_insert(PreparedStatement { row_description: row_description.clone(), ..stmt });
    }

    Ok((rows, affected))
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

    fn ready(status: u8) -> Vec<u8> {
        frame(tag::READY_FOR_QUERY, &[status])
    }

    #[test]
    fn simple_query_decodes_rows_and_drains_to_ready() {
        let mut script = frame(tag::ROW_DESCRIPTION, &row_description(&[("n", crate::value::oid::INT4)]));
        script.extend(frame(tag::DATA_ROW, &data_row(&[Some(&42i32.to_be_bytes())])));
        script.extend(command_complete("SELECT 1"));
        script.extend(ready(b'I'));

        let mut conn = TestConn::new(script);
        let rows: Vec<(i32,)> = crate::block_on(query("select 1 as n", &mut conn)).unwrap();
        assert_eq!(rows, vec![(42,)]);
        let needle = b"select 1 as n";
        assert!(conn.written().windows(needle.len()).any(|w| w == &needle[..]));
    }

    #[test]
    fn simple_query_drop_reports_affected_rows() {
        let mut script = command_complete("DELETE 3");
        script.extend(ready(b'I'));

        let mut conn = TestConn::new(script);
        let affected = crate::block_on(query_drop("delete from t", &mut conn)).unwrap();
        assert_eq!(affected, 3);
    }

    #[test]
    fn exec_cache_miss_then_hit_skips_describe_on_second_call() {
        let mut script = frame(tag::PARSE_COMPLETE, &[]);
        script.extend(frame(tag::BIND_COMPLETE, &[]));
        script.extend(frame(tag::ROW_DESCRIPTION, &row_description(&[("n", crate::value::oid::INT4)])));
        script.extend(frame(tag::DATA_ROW, &data_row(&[Some(&1i32.to_be_bytes())])));
        script.extend(command_complete("SELECT 1"));
        script.extend(ready(b'I'));
        // second call: cache hit, no Parse/Describe round-trip
        script.extend(frame(tag::BIND_COMPLETE, &[]));
        script.extend(frame(tag::DATA_ROW, &data_row(&[Some(&2i32.to_be_bytes())])));
        script.extend(command_complete("SELECT 1"));
        script.extend(ready(b'I'));

        let mut conn = TestConn::new(script);
        let first: Vec<(i32,)> = crate::block_on(exec("select $1::int4", (1i32,), &mut conn)).unwrap();
        assert_eq!(first, vec![(1,)]);
        let second: Vec<(i32,)> = crate::block_on(exec("select $1::int4", (2i32,), &mut conn)).unwrap();
        assert_eq!(second, vec![(2,)]);
    }

    #[test]
    fn exec_batch_sends_nothing_for_an_empty_batch() {
        let mut conn = TestConn::new(Vec::new());
        crate::block_on(exec_batch::<(i32,)>("insert into t values ($1)", Vec::new(), &mut conn)).unwrap();
        assert!(conn.written().is_empty());
    }

    #[cfg(feature = "live_test")]
    #[test]
    #[ignore = "requires a reachable postgres instance"]
    fn exec_round_trips_against_a_live_server() {
        let mut conn = crate::connection::Connection::connect_env().unwrap();
        let rows: Vec<(i32,)> = crate::block_on(exec("select $1::int4 + 1", (41i32,), &mut conn)).unwrap();
        assert_eq!(rows, vec![(42,)]);
    }
}
