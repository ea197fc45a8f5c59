//! Frontend (client → server) messages.
use bytes::{BufMut, BytesMut};

use crate::{
    ext::{BufMutExt, StrExt, UsizeExt},
    statement::{PortalName, StatementName},
};

use super::frontend_tag as tag;

/// A message that can be serialized onto the outgoing buffer.
///
/// Implementors write their own tag byte and length prefix; [`FrontendProtocol::encode`]
/// is the single call site the transport layer routes every outgoing message through.
pub trait FrontendProtocol {
    fn encode(&self, buf: &mut BytesMut);
}

fn with_len(buf: &mut BytesMut, tag: u8, body: impl FnOnce(&mut BytesMut)) {
    buf.put_u8(tag);
    let len_pos = buf.len();
    buf.put_i32(0);
    let start = buf.len();
    body(buf);
    let written = (buf.len() - start + 4).to_i32();
    buf[len_pos..len_pos + 4].copy_from_slice(&written.to_be_bytes());
}

/// The very first message sent by the client has no leading tag byte.
pub struct Startup<'a> {
    pub user: &'a str,
    pub database: Option<&'a str>,
    pub application_name: Option<&'a str>,
    pub replication: Option<&'a str>,
}

impl Startup<'_> {
    pub fn write(&self, buf: &mut BytesMut) {
        let len_pos = buf.len();
        buf.put_i32(0);
        buf.put_i32(196608); // protocol version 3.0

        buf.put_nul_string("user");
        buf.put_nul_string(self.user);

        if let Some(db) = self.database {
            buf.put_nul_string("database");
            buf.put_nul_string(db);
        }
        if let Some(name) = self.application_name {
            buf.put_nul_string("application_name");
            buf.put_nul_string(name);
        }
        if let Some(repl) = self.replication {
            buf.put_nul_string("replication");
            buf.put_nul_string(repl);
        }
        buf.put_u8(0);

        let written = (buf.len() - len_pos).to_i32();
        buf[len_pos..len_pos + 4].copy_from_slice(&written.to_be_bytes());
    }
}

/// `SSLRequest`: sent in place of a startup message to negotiate TLS.
pub struct SslRequest;

impl SslRequest {
    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_i32(8);
        buf.put_i32(80877103);
    }
}

pub struct PasswordMessage<'a> {
    pub password: &'a str,
}

impl FrontendProtocol for PasswordMessage<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        with_len(buf, tag::PASSWORD, |b| b.put_nul_string(self.password));
    }
}

pub struct SaslInitialResponse<'a> {
    pub mechanism: &'a str,
    pub data: &'a [u8],
}

impl FrontendProtocol for SaslInitialResponse<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        with_len(buf, tag::PASSWORD, |b| {
            b.put_nul_string(self.mechanism);
            b.put_i32(self.data.len().to_i32());
            b.put_slice(self.data);
        });
    }
}

pub struct SaslResponse<'a> {
    pub data: &'a [u8],
}

impl FrontendProtocol for SaslResponse<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        with_len(buf, tag::PASSWORD, |b| b.put_slice(self.data));
    }
}

/// Simple query protocol.
pub struct Query<'a> {
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        with_len(buf, tag::QUERY, |b| b.put_nul_string(self.sql));
    }
}

/// Binary parameter value, `None` encodes as the `-1`-length NULL marker.
pub struct ParamValue<'a>(pub Option<&'a [u8]>);

/// `Parse`: create a prepared statement, OIDs empty infers parameter types server-side.
pub struct Parse<'a> {
    pub statement: &'a StatementName,
    pub sql: &'a str,
    pub param_oids: &'a [u32],
}

impl FrontendProtocol for Parse<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        with_len(buf, tag::PARSE, |b| {
            b.put_nul_string(self.statement.as_str());
            b.put_nul_string(self.sql);
            b.put_i16(self.param_oids.len().to_u16() as i16);
            for oid in self.param_oids {
                b.put_u32(*oid);
            }
        });
    }
}

/// `Bind`: bind parameter values to a portal, requesting binary results for every column.
pub struct Bind<'a> {
    pub portal: &'a PortalName,
    pub statement: &'a StatementName,
    pub params: &'a [ParamValue<'a>],
}

impl FrontendProtocol for Bind<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        with_len(buf, tag::BIND, |b| {
            b.put_nul_string(self.portal.as_str());
            b.put_nul_string(self.statement.as_str());

            // all parameters are sent in binary format
            b.put_i16(1);
            b.put_i16(1);

            b.put_i16(self.params.len().to_u16() as i16);
            for p in self.params {
                match p.0 {
                    Some(bytes) => {
                        b.put_i32(bytes.len().to_i32());
                        b.put_slice(bytes);
                    }
                    None => b.put_i32(-1),
                }
            }

            // all result columns requested in binary format
            b.put_i16(1);
            b.put_i16(1);
        });
    }
}

#[derive(Clone, Copy)]
pub enum DescribeTarget<'a> {
    Statement(&'a StatementName),
    Portal(&'a PortalName),
}

pub struct Describe<'a>(pub DescribeTarget<'a>);

impl FrontendProtocol for Describe<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        with_len(buf, tag::DESCRIBE, |b| match self.0 {
            DescribeTarget::Statement(s) => {
                b.put_u8(b'S');
                b.put_nul_string(s.as_str());
            }
            DescribeTarget::Portal(p) => {
                b.put_u8(b'P');
                b.put_nul_string(p.as_str());
            }
        });
    }
}

pub struct CloseStatement<'a>(pub &'a StatementName);

impl FrontendProtocol for CloseStatement<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        with_len(buf, tag::CLOSE, |b| {
            b.put_u8(b'S');
            b.put_nul_string(self.0.as_str());
        });
    }
}

pub struct ClosePortal<'a>(pub &'a PortalName);

impl FrontendProtocol for ClosePortal<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        with_len(buf, tag::CLOSE, |b| {
            b.put_u8(b'P');
            b.put_nul_string(self.0.as_str());
        });
    }
}

/// `Execute`: `max_rows = 0` means "no limit".
pub struct Execute<'a> {
    pub portal: &'a PortalName,
    pub max_rows: i32,
}

impl FrontendProtocol for Execute<'_> {
    fn encode(&self, buf: &mut BytesMut) {
        with_len(buf, tag::EXECUTE, |b| {
            b.put_nul_string(self.portal.as_str());
            b.put_i32(self.max_rows);
        });
    }
}

pub struct Sync;

impl FrontendProtocol for Sync {
    fn encode(&self, buf: &mut BytesMut) {
        with_len(buf, tag::SYNC, |_| {});
    }
}

pub struct Flush;

impl FrontendProtocol for Flush {
    fn encode(&self, buf: &mut BytesMut) {
        with_len(buf, tag::FLUSH, |_| {});
    }
}

pub struct Terminate;

impl FrontendProtocol for Terminate {
    fn encode(&self, buf: &mut BytesMut) {
        with_len(buf, tag::TERMINATE, |_| {});
    }
}

/// `CancelRequest`: sent over a fresh connection, never on the main transport.
pub struct CancelRequest {
    pub process_id: i32,
    pub secret_key: i32,
}

impl CancelRequest {
    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_i32(16);
        buf.put_i32(80877102);
        buf.put_i32(self.process_id);
        buf.put_i32(self.secret_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;

    fn split_frame(buf: &BytesMut) -> (u8, i32, &[u8]) {
        let tag = buf[0];
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        (tag, len, &buf[5..])
    }

    #[test]
    fn startup_has_no_tag_byte_and_a_correct_self_inclusive_length() {
        let mut buf = BytesMut::new();
        Startup { user: "alice", database: Some("db"), application_name: None, replication: None }.write(&mut buf);
        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len());
        assert!(buf.windows(b"user\0alice\0".len()).any(|w| w == b"user\0alice\0"));
        assert!(buf.windows(b"database\0db\0".len()).any(|w| w == b"database\0db\0"));
        assert_eq!(*buf.last().unwrap(), 0);
    }

    #[test]
    fn ssl_request_writes_the_fixed_unframed_code() {
        let mut buf = BytesMut::new();
        SslRequest.write(&mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f]);
    }

    #[test]
    fn password_message_is_tagged_and_length_framed() {
        let mut buf = BytesMut::new();
        PasswordMessage { password: "hunter2" }.encode(&mut buf);
        let (tag, len, rest) = split_frame(&buf);
        assert_eq!(tag, super::tag::PASSWORD);
        assert_eq!(len as usize, buf.len() - 1);
        assert_eq!(rest, b"hunter2\0");
    }

    #[test]
    fn sasl_initial_response_carries_mechanism_and_raw_data() {
        let mut buf = BytesMut::new();
        SaslInitialResponse { mechanism: "SCRAM-SHA-256", data: b"n,,n=,r=abc" }.encode(&mut buf);
        let (tag, _, rest) = split_frame(&buf);
        assert_eq!(tag, super::tag::PASSWORD);
        assert!(rest.starts_with(b"SCRAM-SHA-256\0"));
        let mut after_mech = &rest[b"SCRAM-SHA-256\0".len()..];
        let data_len = after_mech.get_i32();
        assert_eq!(data_len as usize, b"n,,n=,r=abc".len());
        assert_eq!(&after_mech[..data_len as usize], b"n,,n=,r=abc");
    }

    #[test]
    fn parse_encodes_statement_sql_and_param_oids() {
        let stmt = StatementName::unnamed();
        let mut buf = BytesMut::new();
        Parse { statement: &stmt, sql: "select $1", param_oids: &[23, 25] }.encode(&mut buf);
        let (tag, _, rest) = split_frame(&buf);
        assert_eq!(tag, super::tag::PARSE);
        assert!(rest.starts_with(b"\0select $1\0"));
        let oid_section = &rest[b"\0select $1\0".len()..];
        assert_eq!(i16::from_be_bytes([oid_section[0], oid_section[1]]), 2);
    }

    #[test]
    fn bind_requests_binary_format_for_params_and_results() {
        let portal = PortalName::unnamed();
        let stmt = StatementName::unnamed();
        let values = [ParamValue(Some(&42i32.to_be_bytes())), ParamValue(None)];
        let mut buf = BytesMut::new();
        Bind { portal: &portal, statement: &stmt, params: &values }.encode(&mut buf);
        let (tag, _, mut rest) = split_frame(&buf);
        assert_eq!(tag, super::tag::BIND);
        assert!(rest.starts_with(b"\0\0")); // unnamed portal, unnamed statement
        rest = &rest[2..];
        assert_eq!(i16::from_be_bytes([rest[0], rest[1]]), 1); // param format code count
        assert_eq!(i16::from_be_bytes([rest[2], rest[3]]), 1); // binary
        assert_eq!(i16::from_be_bytes([rest[4], rest[5]]), 2); // param count
    }

    #[test]
    fn describe_tags_statement_and_portal_targets_distinctly() {
        let stmt = StatementName::unnamed();
        let mut buf = BytesMut::new();
        Describe(DescribeTarget::Statement(&stmt)).encode(&mut buf);
        let (_, _, rest) = split_frame(&buf);
        assert_eq!(rest[0], b'S');

        let portal = PortalName::unnamed();
        let mut buf = BytesMut::new();
        Describe(DescribeTarget::Portal(&portal)).encode(&mut buf);
        let (_, _, rest) = split_frame(&buf);
        assert_eq!(rest[0], b'P');
    }

    #[test]
    fn execute_encodes_the_portal_name_and_row_limit() {
        let portal = PortalName::unnamed();
        let mut buf = BytesMut::new();
        Execute { portal: &portal, max_rows: 10 }.encode(&mut buf);
        let (tag, _, rest) = split_frame(&buf);
        assert_eq!(tag, super::tag::EXECUTE);
        let limit = i32::from_be_bytes(rest[1..5].try_into().unwrap());
        assert_eq!(limit, 10);
    }

    #[test]
    fn sync_flush_and_terminate_are_bare_zero_length_frames() {
        let cases: [(u8, fn(&mut BytesMut)); 3] = [
            (super::tag::SYNC, |b| Sync.encode(b)),
            (super::tag::FLUSH, |b| Flush.encode(b)),
            (super::tag::TERMINATE, |b| Terminate.encode(b)),
        ];
        for (want, encode) in cases {
            let mut buf = BytesMut::new();
            encode(&mut buf);
            let (tag, len, rest) = split_frame(&buf);
            assert_eq!(tag, want);
            assert_eq!(len, 4);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn cancel_request_has_no_tag_and_the_fixed_request_code() {
        let mut buf = BytesMut::new();
        CancelRequest { process_id: 100, secret_key: 200 }.write(&mut buf);
        assert_eq!(&buf[0..8], &[0, 0, 0, 16, 0x04, 0xd2, 0x16, 0x2e]);
        assert_eq!(i32::from_be_bytes(buf[8..12].try_into().unwrap()), 100);
        assert_eq!(i32::from_be_bytes(buf[12..16].try_into().unwrap()), 200);
    }
}
