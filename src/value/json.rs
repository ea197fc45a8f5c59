//! `Json<T>` wrapper (`json` feature, §10.5): disambiguates a `serde`
//! value from a plain `text` binding and carries the jsonb version byte.
use serde::{de::DeserializeOwned, Serialize};

use super::{oid, Encode, Oid, PgType};
use crate::row::{Column, Decode, DecodeError};

const JSONB_VERSION: u8 = 1;

/// Binds/decodes `T` as PostgreSQL `json` or `jsonb` via `serde_json`.
///
/// Defaults to `jsonb` (the version-byte-prefixed format); use
/// [`Json::as_json`] to bind the plain `json` OID instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Json<T>(pub T, bool);

impl<T> Json<T> {
    pub fn new(value: T) -> Self {
        Self(value, true)
    }

    /// Bind as `json` rather than `jsonb`.
    pub fn as_json(value: T) -> Self {
        Self(value, false)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::ops::Deref for Json<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Serialize> PgType for Json<T> {
    const OID: Oid = oid::JSONB;
}

impl<T: Serialize> Encode for Json<T> {
    // Bind always requests the binary format (§4.2), and PostgreSQL's binary
    // json/jsonb wire representation is byte-identical to the text one
    // except for jsonb's leading version byte, so no format override is needed.
    fn encode(&self, buf: &mut Vec<u8>) {
        if self.1 {
            buf.push(JSONB_VERSION);
        }
        serde_json::to_writer(&mut *buf, &self.0).expect("serializing to a Vec<u8> cannot fail");
    }
}

impl<T: DeserializeOwned> Decode for Json<T> {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        let col_oid = col.oid();
        if col_oid != oid::JSON && col_oid != oid::JSONB {
            return Err(DecodeError::OidMismatch { expected: oid::JSONB, got: col_oid });
        }
        let bytes = col.try_into_value()?;
        let body = if col_oid == oid::JSONB {
            bytes.get(1..).ok_or(DecodeError::BadLength)?
        } else {
            &bytes[..]
        };
        let value = serde_json::from_slice(body)?;
        Ok(Json(value, col_oid == oid::JSONB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;
    use crate::transport::{data_row, row_description};
    use bytes::Bytes;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: i32,
    }

    fn one_column(column_oid: Oid, value: Option<&[u8]>) -> Row {
        let fields = Bytes::from(row_description(&[("doc", column_oid)]));
        let values = Bytes::from(data_row(&[value]));
        Row::new(fields, values)
    }

    #[test]
    fn jsonb_round_trips_with_its_version_byte() {
        let doc = Doc { name: "ferris".into(), count: 3 };
        let mut buf = Vec::new();
        Json::new(doc.clone()).encode(&mut buf);
        assert_eq!(buf[0], JSONB_VERSION);

        let row = one_column(oid::JSONB, Some(&buf));
        let decoded: Json<Doc> = row.try_get(0).unwrap();
        assert_eq!(decoded.into_inner(), doc);
    }

    #[test]
    fn as_json_encodes_with_no_version_byte_and_decodes_from_the_json_oid() {
        let doc = Doc { name: "plain".into(), count: 0 };
        let mut buf = Vec::new();
        Json::as_json(doc.clone()).encode(&mut buf);
        assert_eq!(&buf, &serde_json::to_vec(&doc).unwrap());

        let row = one_column(oid::JSON, Some(&buf));
        let decoded: Json<Doc> = row.try_get(0).unwrap();
        assert_eq!(decoded.into_inner(), doc);
    }

    #[test]
    fn decode_rejects_a_non_json_oid() {
        let row = one_column(oid::TEXT, Some(b"{}"));
        assert!(matches!(row.try_get::<_, Json<Doc>>(0).unwrap_err(), DecodeError::OidMismatch { .. }));
    }
}
