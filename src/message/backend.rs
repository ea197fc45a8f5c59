//! Backend (server → client) messages.
use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::ext::BytesExt;

use super::{backend_tag as tag, BackendProtocol, ProtocolError};

fn expect(tag_got: u8, tag_want: u8, expected: &'static str, context: &'static str) -> Result<(), Error> {
    if tag_got != tag_want {
        return Err(ProtocolError::unexpected(expected, context, tag_got).into());
    }
    Ok(())
}

#[derive(Debug)]
pub enum Authentication {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    SaslMechanisms(Vec<String>),
    SaslContinue(Bytes),
    SaslFinal(Bytes),
}

impl BackendProtocol for Authentication {
    fn decode(tag_got: u8, mut payload: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::AUTHENTICATION, "Authentication", "auth phase")?;
        Ok(match payload.get_i32() {
            0 => Authentication::Ok,
            3 => Authentication::CleartextPassword,
            5 => {
                let mut salt = [0u8; 4];
                payload.copy_to_slice(&mut salt);
                Authentication::Md5Password { salt }
            }
            10 => {
                let mut mechanisms = Vec::new();
                while payload.remaining() > 1 {
                    let s = payload.get_nul_bytestr().map_err(|_| ProtocolError::Utf8)?;
                    mechanisms.push(s.as_str().to_owned());
                }
                Authentication::SaslMechanisms(mechanisms)
            }
            11 => Authentication::SaslContinue(payload),
            12 => Authentication::SaslFinal(payload),
            other => {
                return Err(ProtocolError::Unexpected {
                    expected: "supported authentication method",
                    context: "auth phase",
                    tag: other as u8,
                }
                .into())
            }
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackendKeyData {
    pub process_id: i32,
    pub secret_key: i32,
}

impl BackendProtocol for BackendKeyData {
    fn decode(tag_got: u8, mut payload: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::BACKEND_KEY_DATA, "BackendKeyData", "startup")?;
        Ok(Self { process_id: payload.get_i32(), secret_key: payload.get_i32() })
    }
}

#[derive(Debug)]
pub struct ParameterStatus {
    pub name: String,
    pub value: String,
}

impl BackendProtocol for ParameterStatus {
    fn decode(tag_got: u8, mut payload: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::PARAMETER_STATUS, "ParameterStatus", "startup")?;
        let name = payload.get_nul_bytestr().map_err(|_| ProtocolError::Utf8)?;
        let value = payload.get_nul_bytestr().map_err(|_| ProtocolError::Utf8)?;
        Ok(Self { name: name.as_str().to_owned(), value: value.as_str().to_owned() })
    }
}

/// Transaction-block status byte: `I`dle, in-`T`ransaction, failed (`E`rror).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Idle,
    InTransaction,
    Failed,
}

impl TxStatus {
    pub fn from_byte(b: u8) -> Result<Self, Error> {
        Ok(match b {
            b'I' => TxStatus::Idle,
            b'T' => TxStatus::InTransaction,
            b'E' => TxStatus::Failed,
            other => {
                return Err(ProtocolError::Unexpected {
                    expected: "I/T/E transaction status",
                    context: "ReadyForQuery",
                    tag: other,
                }
                .into())
            }
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReadyForQuery {
    pub tx_status: TxStatus,
}

impl BackendProtocol for ReadyForQuery {
    fn decode(tag_got: u8, mut payload: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::READY_FOR_QUERY, "ReadyForQuery", "protocol sync")?;
        Ok(Self { tx_status: TxStatus::from_byte(payload.get_u8())? })
    }
}

pub struct ParseComplete;

impl BackendProtocol for ParseComplete {
    fn decode(tag_got: u8, _: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::PARSE_COMPLETE, "ParseComplete", "extended query")?;
        Ok(Self)
    }
}

pub struct BindComplete;

impl BackendProtocol for BindComplete {
    fn decode(tag_got: u8, _: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::BIND_COMPLETE, "BindComplete", "extended query")?;
        Ok(Self)
    }
}

pub struct CloseComplete;

impl BackendProtocol for CloseComplete {
    fn decode(tag_got: u8, _: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::CLOSE_COMPLETE, "CloseComplete", "extended query")?;
        Ok(Self)
    }
}

pub struct EmptyQueryResponse;

impl BackendProtocol for EmptyQueryResponse {
    fn decode(tag_got: u8, _: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::EMPTY_QUERY_RESPONSE, "EmptyQueryResponse", "query")?;
        Ok(Self)
    }
}

pub struct PortalSuspended;

impl BackendProtocol for PortalSuspended {
    fn decode(tag_got: u8, _: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::PORTAL_SUSPENDED, "PortalSuspended", "portal execute")?;
        Ok(Self)
    }
}

/// `t`: parameter type OIDs inferred for a prepared statement.
#[derive(Debug, Clone)]
pub struct ParameterDescription {
    pub param_oids: Vec<u32>,
}

impl BackendProtocol for ParameterDescription {
    fn decode(tag_got: u8, mut payload: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::PARAMETER_DESCRIPTION, "ParameterDescription", "extended query")?;
        let n = payload.get_i16() as usize;
        let mut param_oids = Vec::with_capacity(n);
        for _ in 0..n {
            param_oids.push(payload.get_u32());
        }
        Ok(Self { param_oids })
    }
}

/// `n`: statement produces no rows (DDL, DML without RETURNING).
pub struct NoData;

impl BackendProtocol for NoData {
    fn decode(tag_got: u8, _: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::NO_DATA, "NoData", "extended query")?;
        Ok(Self)
    }
}

/// `T`: field descriptions for the result set about to stream.
///
/// Stored as the raw post-count bytes; [`crate::row::Row`] re-walks this
/// buffer lazily instead of eagerly allocating a `Vec<Field>`.
#[derive(Debug, Clone)]
pub struct RowDescription {
    pub raw: Bytes,
}

impl BackendProtocol for RowDescription {
    fn decode(tag_got: u8, payload: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::ROW_DESCRIPTION, "RowDescription", "extended query")?;
        Ok(Self { raw: payload })
    }
}

/// `D`: one row of column values, still length-prefixed per-column.
#[derive(Debug, Clone)]
pub struct DataRow {
    pub raw: Bytes,
}

impl BackendProtocol for DataRow {
    fn decode(tag_got: u8, payload: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::DATA_ROW, "DataRow", "result streaming")?;
        Ok(Self { raw: payload })
    }
}

/// `C`: terminates a result set; carries the textual command tag.
#[derive(Debug, Clone)]
pub struct CommandComplete {
    pub tag: String,
}

impl CommandComplete {
    /// Parse the trailing row count out of tags like `INSERT 0 3`, `SELECT 3`, `CREATE TABLE`.
    pub fn rows_affected(&self) -> u64 {
        self.tag
            .rsplit(' ')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }
}

impl BackendProtocol for CommandComplete {
    fn decode(tag_got: u8, mut payload: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::COMMAND_COMPLETE, "CommandComplete", "result streaming")?;
        let s = payload.get_nul_bytestr().map_err(|_| ProtocolError::Utf8)?;
        Ok(Self { tag: s.as_str().to_owned() })
    }
}

/// `E`/`N`: structured error/notice fields, keyed by a single type byte.
#[derive(Debug, Clone, Default)]
pub struct ErrorFields {
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

fn parse_error_fields(mut payload: Bytes) -> Result<ErrorFields, Error> {
    let mut out = ErrorFields::default();
    loop {
        if !payload.has_remaining() {
            break;
        }
        let field_type = payload.get_u8();
        if field_type == 0 {
            break;
        }
        let value = payload.get_nul_bytestr().map_err(|_| ProtocolError::Utf8)?;
        match field_type {
            b'S' => out.severity = value.as_str().to_owned(),
            b'C' => out.code = value.as_str().to_owned(),
            b'M' => out.message = value.as_str().to_owned(),
            b'D' => out.detail = Some(value.as_str().to_owned()),
            b'H' => out.hint = Some(value.as_str().to_owned()),
            _ => {}
        }
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct ErrorResponse(pub ErrorFields);

impl BackendProtocol for ErrorResponse {
    fn decode(tag_got: u8, payload: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::ERROR_RESPONSE, "ErrorResponse", "any")?;
        Ok(Self(parse_error_fields(payload)?))
    }
}

#[derive(Debug, Clone)]
pub struct NoticeResponse(pub ErrorFields);

impl BackendProtocol for NoticeResponse {
    fn decode(tag_got: u8, payload: Bytes) -> Result<Self, Error> {
        expect(tag_got, tag::NOTICE_RESPONSE, "NoticeResponse", "any")?;
        Ok(Self(parse_error_fields(payload)?))
    }
}

/// Catch-all decode target for call sites that branch on several possible
/// next messages (the startup loop, the simple-query result loop, …).
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    ParameterStatus(ParameterStatus),
    ReadyForQuery(ReadyForQuery),
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    ParameterDescription(ParameterDescription),
    RowDescription(RowDescription),
    DataRow(DataRow),
    CommandComplete(CommandComplete),
    EmptyQueryResponse,
    PortalSuspended,
}

impl BackendMessage {
    pub fn unexpected(&self, context: &'static str) -> Error {
        let name = match self {
            Self::Authentication(_) => "Authentication",
            Self::BackendKeyData(_) => "BackendKeyData",
            Self::ParameterStatus(_) => "ParameterStatus",
            Self::ReadyForQuery(_) => "ReadyForQuery",
            Self::ParseComplete => "ParseComplete",
            Self::BindComplete => "BindComplete",
            Self::CloseComplete => "CloseComplete",
            Self::NoData => "NoData",
            Self::ParameterDescription(_) => "ParameterDescription",
            Self::RowDescription(_) => "RowDescription",
            Self::DataRow(_) => "DataRow",
            Self::CommandComplete(_) => "CommandComplete",
            Self::EmptyQueryResponse => "EmptyQueryResponse",
            Self::PortalSuspended => "PortalSuspended",
        };
        ProtocolError::unexpected("a different message", context, name.as_bytes()[0]).into()
    }
}

impl BackendProtocol for BackendMessage {
    fn decode(tag_got: u8, payload: Bytes) -> Result<Self, Error> {
        Ok(match tag_got {
            t if t == tag::AUTHENTICATION => Self::Authentication(Authentication::decode(t, payload)?),
            t if t == tag::BACKEND_KEY_DATA => Self::BackendKeyData(BackendKeyData::decode(t, payload)?),
            t if t == tag::PARAMETER_STATUS => Self::ParameterStatus(ParameterStatus::decode(t, payload)?),
            t if t == tag::READY_FOR_QUERY => Self::ReadyForQuery(ReadyForQuery::decode(t, payload)?),
            t if t == tag::PARSE_COMPLETE => Self::ParseComplete,
            t if t == tag::BIND_COMPLETE => Self::BindComplete,
            t if t == tag::CLOSE_COMPLETE => Self::CloseComplete,
            t if t == tag::NO_DATA => Self::NoData,
            t if t == tag::PARAMETER_DESCRIPTION => {
                Self::ParameterDescription(ParameterDescription::decode(t, payload)?)
            }
            t if t == tag::ROW_DESCRIPTION => Self::RowDescription(RowDescription::decode(t, payload)?),
            t if t == tag::DATA_ROW => Self::DataRow(DataRow::decode(t, payload)?),
            t if t == tag::COMMAND_COMPLETE => Self::CommandComplete(CommandComplete::decode(t, payload)?),
            t if t == tag::EMPTY_QUERY_RESPONSE => Self::EmptyQueryResponse,
            t if t == tag::PORTAL_SUSPENDED => Self::PortalSuspended,
            other => {
                return Err(ProtocolError::Unexpected {
                    expected: "a known backend message",
                    context: "dispatch",
                    tag: other,
                }
                .into())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_decodes_each_known_method() {
        let ok = Authentication::decode(tag::AUTHENTICATION, Bytes::from_static(&0i32.to_be_bytes())).unwrap();
        assert!(matches!(ok, Authentication::Ok));

        let cleartext =
            Authentication::decode(tag::AUTHENTICATION, Bytes::from_static(&3i32.to_be_bytes())).unwrap();
        assert!(matches!(cleartext, Authentication::CleartextPassword));

        let mut md5 = 5i32.to_be_bytes().to_vec();
        md5.extend_from_slice(&[1, 2, 3, 4]);
        let md5 = Authentication::decode(tag::AUTHENTICATION, Bytes::from(md5)).unwrap();
        assert!(matches!(md5, Authentication::Md5Password { salt: [1, 2, 3, 4] }));

        let mut sasl = 10i32.to_be_bytes().to_vec();
        sasl.extend_from_slice(b"SCRAM-SHA-256\0");
        sasl.push(0);
        let sasl = Authentication::decode(tag::AUTHENTICATION, Bytes::from(sasl)).unwrap();
        assert!(matches!(sasl, Authentication::SaslMechanisms(m) if m == vec!["SCRAM-SHA-256"]));
    }

    #[test]
    fn authentication_rejects_an_unsupported_method() {
        let err = Authentication::decode(tag::AUTHENTICATION, Bytes::from_static(&99i32.to_be_bytes()));
        assert!(err.is_err());
    }

    #[test]
    fn backend_key_data_reads_process_id_and_secret_key() {
        let mut payload = 42i32.to_be_bytes().to_vec();
        payload.extend_from_slice(&7i32.to_be_bytes());
        let bkd = BackendKeyData::decode(tag::BACKEND_KEY_DATA, Bytes::from(payload)).unwrap();
        assert_eq!(bkd.process_id, 42);
        assert_eq!(bkd.secret_key, 7);
    }

    #[test]
    fn ready_for_query_decodes_each_tx_status_byte() {
        for (byte, want) in [(b'I', TxStatus::Idle), (b'T', TxStatus::InTransaction), (b'E', TxStatus::Failed)] {
            let rfq = ReadyForQuery::decode(tag::READY_FOR_QUERY, Bytes::from(vec![byte])).unwrap();
            assert_eq!(rfq.tx_status, want);
        }
        assert!(TxStatus::from_byte(b'?').is_err());
    }

    #[test]
    fn command_complete_parses_the_trailing_row_count() {
        for (tag_str, rows) in [("SELECT 3", 3), ("INSERT 0 5", 5), ("CREATE TABLE", 0)] {
            let mut payload = tag_str.as_bytes().to_vec();
            payload.push(0);
            let cc = CommandComplete::decode(tag::COMMAND_COMPLETE, Bytes::from(payload)).unwrap();
            assert_eq!(cc.rows_affected(), rows);
        }
    }

    #[test]
    fn error_response_parses_the_known_field_codes() {
        let mut payload = Vec::new();
        for (code, value) in [(b'S', "ERROR"), (b'C', "23505"), (b'M', "duplicate key"), (b'D', "detail"), (b'H', "hint")] {
            payload.push(code);
            payload.extend_from_slice(value.as_bytes());
            payload.push(0);
        }
        payload.push(0);
        let resp = ErrorResponse::decode(tag::ERROR_RESPONSE, Bytes::from(payload)).unwrap();
        assert_eq!(resp.0.severity, "ERROR");
        assert_eq!(resp.0.code, "23505");
        assert_eq!(resp.0.message, "duplicate key");
        assert_eq!(resp.0.detail.as_deref(), Some("detail"));
        assert_eq!(resp.0.hint.as_deref(), Some("hint"));
    }

    #[test]
    fn decode_rejects_a_mismatched_tag() {
        let err = BackendKeyData::decode(tag::READY_FOR_QUERY, Bytes::new());
        assert!(err.is_err());
    }

    #[test]
    fn backend_message_dispatches_on_tag_and_rejects_unknown_tags() {
        let msg = BackendMessage::decode(tag::NO_DATA, Bytes::new()).unwrap();
        assert!(matches!(msg, BackendMessage::NoData));
        assert!(BackendMessage::decode(0xff, Bytes::new()).is_err());
    }
}
