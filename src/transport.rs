//! The [`PgTransport`] trait and its blocking/suspendable implementors.
//!
//! Both execution surfaces (§2) share this one state machine; they differ
//! only in how `poll_flush`/`poll_recv` suspend when the socket isn't ready.
use std::{
    collections::HashMap,
    io::{self, Read, Write},
    task::{Context, Poll},
};

use bytes::{Buf, BytesMut};

use crate::{
    common::{notice, verbose},
    error::{DbError, Error, Result},
    message::{backend, backend_tag, decode_one, frontend, is_async_tag, BackendProtocol, FrontendProtocol},
};

const READ_CHUNK: usize = 8 * 1024;

/// A buffered stream which can send and receive postgres messages.
///
/// Implementors arm `ready_request` when an `ErrorResponse` was just
/// surfaced, per invariant I2: every later message except `ReadyForQuery`
/// must be silently discarded until the backend reports Idle again.
pub trait PgTransport: Unpin {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>>;

    /// Implementor handles `NoticeResponse`/`ParameterStatus`/
    /// `NotificationResponse`/`NegotiateProtocolVersion` internally and
    /// never surfaces them; `ErrorResponse` is intercepted and returned as
    /// `Err`, arming `ready_request` itself.
    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>>;

    fn ready_request(&mut self);

    /// Buffer `message`; caller must still `flush`.
    fn send<F: FrontendProtocol>(&mut self, message: F);

    /// The startup message has no leading tag byte, so it isn't a [`FrontendProtocol`].
    fn send_startup(&mut self, startup: frontend::Startup);

    /// Last `ParameterStatus` value reported for `name` (e.g. `"server_version"`).
    fn server_parameter(&self, name: &str) -> Option<&str>;
}

impl<P: PgTransport> PgTransport for &mut P {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        P::poll_flush(self, cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        P::poll_recv(self, cx)
    }

    fn ready_request(&mut self) {
        P::ready_request(self);
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        P::send(self, message);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        P::send_startup(self, startup);
    }

    fn server_parameter(&self, name: &str) -> Option<&str> {
        P::server_parameter(self, name)
    }
}

/// Sugar-coats the poll-based [`PgTransport`] methods as `async fn`s via [`std::future::poll_fn`].
pub trait PgTransportExt: PgTransport {
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> {
        std::future::poll_fn(|cx| self.poll_flush(cx))
    }

    fn recv<B: BackendProtocol>(&mut self) -> impl Future<Output = Result<B>> {
        std::future::poll_fn(|cx| self.poll_recv(cx))
    }
}

impl<T: PgTransport> PgTransportExt for T {}

/// Shared buffering and async-message bookkeeping, independent of the socket type.
struct Core {
    write_buf: BytesMut,
    read_buf: BytesMut,
    ignore_until_ready: bool,
    params: HashMap<String, String>,
}

impl Core {
    fn new() -> Self {
        Self {
            write_buf: BytesMut::with_capacity(4096),
            read_buf: BytesMut::with_capacity(4096),
            ignore_until_ready: false,
            params: HashMap::new(),
        }
    }

    /// Try to produce one `B` from already-buffered bytes.
    ///
    /// Returns `Ok(None)` when `read_buf` holds no complete frame (more
    /// bytes must be read from the socket before retrying).
    fn try_decode<B: BackendProtocol>(&mut self) -> Result<Option<B>> {
        loop {
            let Some(raw) = decode_one(&mut self.read_buf)? else {
                return Ok(None);
            };

            // NoticeResponse/ParameterStatus/NotificationResponse/NegotiateProtocolVersion
            // can arrive at any point and are always consumed here, ignore flag or not.
            if is_async_tag(raw.tag) {
                match raw.tag {
                    backend_tag::PARAMETER_STATUS => {
                        let ps = backend::ParameterStatus::decode(raw.tag, raw.payload)?;
                        self.params.insert(ps.name, ps.value);
                    }
                    backend_tag::NOTICE_RESPONSE => {
                        let notice = backend::NoticeResponse::decode(raw.tag, raw.payload)?;
                        notice!("postgres notice: {}", notice.0.message);
                        let _ = notice;
                    }
                    // NotificationResponse / NegotiateProtocolVersion: decoded only far
                    // enough to validate framing, then discarded (no LISTEN/NOTIFY surface, §1).
                    _ => verbose!("discarding async backend message, tag {:?}", raw.tag as char),
                }
                continue;
            }

            if raw.tag == backend_tag::ERROR_RESPONSE {
                let fields = backend::ErrorResponse::decode(raw.tag, raw.payload)?.0;
                self.ignore_until_ready = true;
                return Err(DbError::from(fields).into());
            }

            if self.ignore_until_ready {
                if raw.tag == backend_tag::READY_FOR_QUERY {
                    self.ignore_until_ready = false;
                    return Ok(Some(B::decode(raw.tag, raw.payload)?));
                }
                continue;
            }

            return Ok(Some(B::decode(raw.tag, raw.payload)?));
        }
    }
}

/// Blocking transport over any [`Read`] + [`Write`] socket (the synchronous surface, §2).
///
/// There is no real suspension point here: `cx`'s waker is never armed, the
/// driver just performs ordinary blocking syscalls and always resolves to
/// `Poll::Ready`, matching `io::Read`'s contract.
pub struct BlockingIo<S> {
    socket: S,
    core: Core,
}

impl<S: Read + Write> BlockingIo<S> {
    pub fn new(socket: S) -> Self {
        Self { socket, core: Core::new() }
    }

    pub fn into_inner(self) -> S {
        self.socket
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.socket
    }
}

impl<S: Read + Write + Unpin> PgTransport for BlockingIo<S> {
    fn poll_flush(&mut self, _cx: &mut Context) -> Poll<io::Result<()>> {
        self.socket.write_all(&self.core.write_buf)?;
        self.core.write_buf.clear();
        self.socket.flush()?;
        Poll::Ready(Ok(()))
    }

    fn poll_recv<B: BackendProtocol>(&mut self, _cx: &mut Context) -> Poll<Result<B>> {
        if !self.core.write_buf.is_empty() {
            self.socket.write_all(&self.core.write_buf)?;
            self.core.write_buf.clear();
            self.socket.flush()?;
        }
        loop {
            if let Some(msg) = self.core.try_decode()? {
                return Poll::Ready(Ok(msg));
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.socket.read(&mut chunk)?;
            if n == 0 {
                return Poll::Ready(Err(Error::connection_failed("connection closed by server")));
            }
            self.core.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn ready_request(&mut self) {
        self.core.ignore_until_ready = true;
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        message.encode(&mut self.core.write_buf);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        startup.write(&mut self.core.write_buf);
    }

    fn server_parameter(&self, name: &str) -> Option<&str> {
        self.core.params.get(name).map(String::as_str)
    }
}

/// A canned server in a box: feeds pre-recorded bytes to `read` and captures
/// whatever the client `write`s, so `BlockingIo<MockSocket>` exercises the
/// real message codec and `Core` state machine without a socket.
#[cfg(test)]
pub(crate) struct MockSocket {
    pub to_client: std::io::Cursor<Vec<u8>>,
    pub from_client: Vec<u8>,
}

#[cfg(test)]
impl MockSocket {
    pub(crate) fn new(scripted_reply: Vec<u8>) -> Self {
        Self { to_client: std::io::Cursor::new(scripted_reply), from_client: Vec::new() }
    }
}

#[cfg(test)]
impl Read for MockSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.to_client.read(buf)
    }
}

#[cfg(test)]
impl Write for MockSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.from_client.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hand-assemble one `<tag><len><payload>` backend frame for [`MockSocket`] scripts.
#[cfg(test)]
pub(crate) fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + payload.len());
    out.push(tag);
    out.extend_from_slice(&(payload.len() as i32 + 4).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Build a `RowDescription` payload (post tag+length) for the given
/// `(name, type_oid)` columns, matching what [`crate::row::Row`] expects.
#[cfg(test)]
pub(crate) fn row_description(cols: &[(&str, u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(cols.len() as i16).to_be_bytes());
    for (name, oid) in cols {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.extend_from_slice(&0i32.to_be_bytes()); // table_oid
        out.extend_from_slice(&0i16.to_be_bytes()); // attnum
        out.extend_from_slice(&oid.to_be_bytes()); // type_oid
        out.extend_from_slice(&4i16.to_be_bytes()); // typlen
        out.extend_from_slice(&(-1i32).to_be_bytes()); // typmod
        out.extend_from_slice(&1i16.to_be_bytes()); // format: binary
    }
    out
}

/// Build a `DataRow` payload (post tag+length) from binary column values,
/// `None` encoding as the `-1`-length SQL NULL marker.
#[cfg(test)]
pub(crate) fn data_row(values: &[Option<&[u8]>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(values.len() as i16).to_be_bytes());
    for v in values {
        match v {
            Some(bytes) => {
                out.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                out.extend_from_slice(bytes);
            }
            None => out.extend_from_slice(&(-1i32).to_be_bytes()),
        }
    }
    out
}

/// A bare-bones `PgTransport` + `CachedStatements` over a [`MockSocket`], for
/// testing the query/portal/pipeline surfaces without a real `Connection`.
#[cfg(test)]
pub(crate) struct TestConn {
    io: BlockingIo<MockSocket>,
    cache: crate::statement::StatementCache,
}

#[cfg(test)]
impl TestConn {
    pub(crate) fn new(scripted_reply: Vec<u8>) -> Self {
        Self { io: BlockingIo::new(MockSocket::new(scripted_reply)), cache: crate::statement::StatementCache::new() }
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.io.get_mut().from_client
    }
}

#[cfg(test)]
impl PgTransport for TestConn {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        self.io.poll_flush(cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        self.io.poll_recv(cx)
    }

    fn ready_request(&mut self) {
        self.io.ready_request();
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        self.io.send(message);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        self.io.send_startup(startup);
    }

    fn server_parameter(&self, name: &str) -> Option<&str> {
        self.io.server_parameter(name)
    }
}

#[cfg(test)]
impl crate::statement::CachedStatements for TestConn {
    fn cache_get(&self, sql: &str) -> Option<crate::statement::PreparedStatement> {
        self.cache.get(sql).cloned()
    }

    fn cache_insert(&mut self, stmt: crate::statement::PreparedStatement) {
        self.cache.insert(stmt);
    }
}

#[cfg(feature = "tokio")]
mod tokio_io {
    use super::*;
    use std::pin::Pin;
    use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

    /// Suspendable transport over a tokio socket (the async surface, §2):
    /// genuinely yields at write-readiness (`poll_flush`) and read-readiness
    /// (`poll_recv`) instead of blocking the executor thread.
    pub struct TokioIo<S> {
        socket: S,
        core: Core,
    }

    impl<S: AsyncRead + AsyncWrite + Unpin> TokioIo<S> {
        pub fn new(socket: S) -> Self {
            Self { socket, core: Core::new() }
        }

        pub fn into_inner(self) -> S {
            self.socket
        }

        pub fn get_mut(&mut self) -> &mut S {
            &mut self.socket
        }

        fn poll_write_all(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
            while !self.core.write_buf.is_empty() {
                let n = match Pin::new(&mut self.socket).poll_write(cx, &self.core.write_buf) {
                    Poll::Ready(Ok(n)) => n,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                };
                if n == 0 {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole buffer",
                    )));
                }
                self.core.write_buf.advance(n);
            }
            Pin::new(&mut self.socket).poll_flush(cx)
        }
    }

    impl<S: AsyncRead + AsyncWrite + Unpin> PgTransport for TokioIo<S> {
        fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
            self.poll_write_all(cx)
        }

        fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
            if !self.core.write_buf.is_empty() {
                match self.poll_write_all(cx) {
                    Poll::Ready(Ok(())) => {}
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e.into())),
                    Poll::Pending => return Poll::Pending,
                }
            }
            loop {
                if let Some(msg) = self.core.try_decode()? {
                    return Poll::Ready(Ok(msg));
                }
                let mut scratch = [0u8; READ_CHUNK];
                let mut read_buf = ReadBuf::new(&mut scratch);
                match Pin::new(&mut self.socket).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let filled = read_buf.filled();
                        if filled.is_empty() {
                            return Poll::Ready(Err(Error::connection_failed(
                                "connection closed by server",
                            )));
                        }
                        self.core.read_buf.extend_from_slice(filled);
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e.into())),
                    Poll::Pending => return Poll::Pending,
                }
            }
        }

        fn ready_request(&mut self) {
            self.core.ignore_until_ready = true;
        }

        fn send<F: FrontendProtocol>(&mut self, message: F) {
            message.encode(&mut self.core.write_buf);
        }

        fn send_startup(&mut self, startup: frontend::Startup) {
            startup.write(&mut self.core.write_buf);
        }

        fn server_parameter(&self, name: &str) -> Option<&str> {
            self.core.params.get(name).map(String::as_str)
        }
    }

    impl<S: AsyncRead + AsyncWrite + Unpin> Drop for TokioIo<S> {
        fn drop(&mut self) {
            // best-effort only: a blocking shutdown from `Drop` isn't possible
            // on the async surface, mirroring the teacher's fire-and-forget close.
            let _ = &self.socket;
        }
    }
}

#[cfg(feature = "tokio")]
pub use tokio_io::TokioIo;
