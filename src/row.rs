//! Result row decoding (§3 Row, §9 "Result row as positional-or-named").
//!
//! Every `Row` carries its `RowDescription` alongside the `DataRow` bytes,
//! so column access by position (`row.try_get(0)`) and by name
//! (`row.try_get("id")`) are both always available — there is no separate
//! "dict mode" object, the caller simply picks the indexing type they want
//! (see DESIGN.md for why the `as_dict` flag from §4.4 collapses to this in
//! a statically typed surface).
use bytes::{Buf, Bytes};
use std::{borrow::Cow, fmt, str::Utf8Error, string::FromUtf8Error};

use crate::{
    common::{unit_error, ByteStr},
    ext::{BytesExt, FmtExt},
    value::Oid,
};

// table_oid(4) attnum(2) type_oid(4) typlen(2) typmod(4) format(2)
const FIELD_SUFFIX: usize = 4 + 2 + 4 + 2 + 4 + 2;
const OID_OFFSET: usize = 4 + 2;

/// One row of a result set.
pub struct Row {
    field_len: u16,
    fields: Bytes,
    values: Bytes,
}

impl Row {
    /// Build from the cached `RowDescription` payload and this row's `DataRow` payload.
    pub(crate) fn new(fields: Bytes, mut values: Bytes) -> Self {
        let field_len = {
            let mut f = fields.clone();
            f.get_u16()
        };
        let value_count = values.get_u16();
        debug_assert_eq!(field_len, value_count, "RowDescription/DataRow field count mismatch");
        Self { field_len, fields, values }
    }

    pub const fn is_empty(&self) -> bool {
        self.field_len == 0
    }

    pub const fn len(&self) -> u16 {
        self.field_len
    }

    /// Fetch and decode one column by [`Index`] (`usize` position or `&str` name).
    pub fn try_get<I: Index, R: Decode>(&self, idx: I) -> Result<R, DecodeError> {
        let (name, oid, nth) = idx.locate(&self.fields, self.field_len)?;
        let value = self.nth_value(nth);
        R::decode(Column { name, oid, value })
    }

    fn nth_value(&self, nth: u16) -> Option<Bytes> {
        let mut values = self.values.clone();
        let mut i = 0;
        loop {
            let len = values.get_i32();
            let value = match len {
                -1 => None,
                len => Some(values.split_to(len as usize)),
            };
            if i == nth {
                return value;
            }
            i += 1;
        }
    }

    /// Decode the whole row via [`FromRow`].
    pub fn decode<D: FromRow>(self) -> Result<D, DecodeError> {
        D::from_row(self)
    }
}

impl IntoIterator for Row {
    type Item = Result<Column, DecodeError>;
    type IntoIter = IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        // skip the field-count prefix already consumed by `new`
        let mut fields = self.fields.clone();
        fields.advance(2);
        IntoIter { field_len: self.field_len, fields, values: self.values, at: 0 }
    }
}

pub struct IntoIter {
    field_len: u16,
    fields: Bytes,
    values: Bytes,
    at: u16,
}

impl Iterator for IntoIter {
    type Item = Result<Column, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.at == self.field_len {
            return None;
        }
        let name = match self.fields.get_nul_bytestr() {
            Ok(n) => n,
            Err(_) => {
                self.at = self.field_len;
                return Some(Err(DecodeError::Utf8(Utf8Error::default_for_malformed_row())));
            }
        };
        let rest = self.fields.split_to(FIELD_SUFFIX);
        let oid = (&rest[OID_OFFSET..OID_OFFSET + 4]).get_u32();
        let len = self.values.get_i32();
        let value = match len {
            -1 => None,
            len => Some(self.values.split_to(len as usize)),
        };
        self.at += 1;
        Some(Ok(Column { name, oid, value }))
    }
}

trait Utf8ErrorExt {
    fn default_for_malformed_row() -> Utf8Error;
}

impl Utf8ErrorExt for Utf8Error {
    fn default_for_malformed_row() -> Utf8Error {
        // construct via a guaranteed-invalid byte sequence; only reached on
        // a server bug (RowDescription with a non-UTF8 column name).
        std::str::from_utf8(&[0xff]).unwrap_err()
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        let mut fields = self.fields.clone();
        fields.advance(2);
        let mut values = self.values.clone();
        for _ in 0..self.field_len {
            let Ok(key) = fields.get_nul_bytestr() else { break };
            fields.advance(FIELD_SUFFIX);
            let len = values.get_i32();
            dbg.key(&key);
            match len {
                -1 => dbg.value(&format_args!("NULL")),
                len => dbg.value(&values.split_to(len as usize).lossy()),
            };
        }
        dbg.finish()
    }
}

/// One column value, still attached to its name and declared OID.
#[derive(Debug, Clone)]
pub struct Column {
    name: ByteStr,
    oid: Oid,
    value: Option<Bytes>,
}

impl Column {
    pub const fn oid(&self) -> Oid {
        self.oid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn is_null(&self) -> bool {
        self.value.is_none()
    }

    pub fn as_slice(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn value(&self) -> Option<Bytes> {
        self.value.clone()
    }

    pub fn into_value(self) -> Option<Bytes> {
        self.value
    }

    pub fn try_into_value(self) -> Result<Bytes, DecodeError> {
        self.value.ok_or(DecodeError::Null)
    }

    pub fn decode<D: Decode>(self) -> Result<D, DecodeError> {
        D::decode(self)
    }
}

/// The row count parsed from a `CommandComplete` command tag (§3 affected rows).
#[derive(Debug, Clone, Copy)]
pub struct RowResult {
    pub rows_affected: u64,
}

/// Constructed from a whole [`Row`].
pub trait FromRow: Sized {
    fn from_row(row: Row) -> Result<Self, DecodeError>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self, DecodeError> {
        Ok(row)
    }
}

impl FromRow for () {
    fn from_row(_: Row) -> Result<Self, DecodeError> {
        Ok(())
    }
}

macro_rules! from_row_tuple {
    ($($t:ident $i:literal),*) => {
        impl<$($t: Decode),*> FromRow for ($($t,)*) {
            fn from_row(row: Row) -> Result<Self, DecodeError> {
                Ok(($(row.try_get($i)?,)*))
            }
        }
    };
}

from_row_tuple!(T0 0);
from_row_tuple!(T0 0, T1 1);
from_row_tuple!(T0 0, T1 1, T2 2);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4, T5 5);

/// Constructed from a single [`Column`].
pub trait Decode: Sized {
    fn decode(column: Column) -> Result<Self, DecodeError>;
}

impl Decode for Column {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        Ok(column)
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        if column.is_null() {
            Ok(None)
        } else {
            column.decode().map(Some)
        }
    }
}

impl Decode for () {
    fn decode(_: Column) -> Result<Self, DecodeError> {
        Ok(())
    }
}

/// Column lookup key: position or name.
pub trait Index: Sized + sealed::Sealed {
    /// Returns (column name, declared oid, which DataRow slot to read).
    fn locate(self, fields: &Bytes, len: u16) -> Result<(ByteStr, Oid, u16), DecodeError>;
}

impl Index for usize {
    fn locate(self, fields: &Bytes, len: u16) -> Result<(ByteStr, Oid, u16), DecodeError> {
        if self as u16 >= len {
            return Err(DecodeError::IndexOutOfBounds(self));
        }
        let mut f = fields.clone();
        f.advance(2);
        for nth in 0..len {
            let name = f.get_nul_bytestr().map_err(DecodeError::Utf8)?;
            let rest = f.split_to(FIELD_SUFFIX);
            if nth as usize == self {
                let oid = (&rest[OID_OFFSET..OID_OFFSET + 4]).get_u32();
                return Ok((name, oid, nth));
            }
        }
        Err(DecodeError::IndexOutOfBounds(self))
    }
}

impl Index for &str {
    fn locate(self, fields: &Bytes, len: u16) -> Result<(ByteStr, Oid, u16), DecodeError> {
        let mut f = fields.clone();
        f.advance(2);
        for nth in 0..len {
            let name = f.get_nul_bytestr().map_err(DecodeError::Utf8)?;
            let rest = f.split_to(FIELD_SUFFIX);
            if name.as_str() == self {
                let oid = (&rest[OID_OFFSET..OID_OFFSET + 4]).get_u32();
                return Ok((name, oid, nth));
            }
        }
        Err(DecodeError::ColumnNotFound(self.to_owned().into()))
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for usize {}
    impl Sealed for &str {}
}

unit_error! {
    /// `*_first` found no row (§8 P2): this is the sentinel surfaced as `Option::None`,
    /// not normally constructed directly by callers.
    pub struct RowNotFound("row not found");
}

unit_error! {
    /// A simple-query batch's first result set was `EmptyQueryResponse`.
    pub struct EmptyQueryError("query string was empty");
}

/// An error decoding a column or row value.
pub enum DecodeError {
    Utf8(Utf8Error),
    ColumnNotFound(Cow<'static, str>),
    IndexOutOfBounds(usize),
    OidMismatch { expected: Oid, got: Oid },
    BadLength,
    Null,
    #[cfg(feature = "json")]
    Json(serde_json::error::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value: ")?;
        match self {
            Self::Utf8(e) => write!(f, "{e}"),
            Self::ColumnNotFound(name) => write!(f, "column not found: {name:?}"),
            Self::IndexOutOfBounds(i) => write!(f, "index out of bounds: {i}"),
            Self::OidMismatch { expected, got } => {
                write!(f, "oid mismatch, expected {expected}, got {got}")
            }
            Self::BadLength => write!(f, "unexpected value length"),
            Self::Null => write!(f, "unexpected NULL value"),
            #[cfg(feature = "json")]
            Self::Json(e) => write!(f, "{e}"),
        }
    }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for DecodeError {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

from!(<Utf8Error>e => Self::Utf8(e));
from!(<FromUtf8Error>e => Self::Utf8(e.utf8_error()));
#[cfg(feature = "json")]
from!(<serde_json::error::Error>e => Self::Json(e));

impl std::error::Error for DecodeError {}

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{data_row, row_description};
    use crate::value::oid;

    fn two_columns() -> Row {
        let fields = Bytes::from(row_description(&[("id", oid::INT4), ("name", oid::TEXT)]));
        let values = Bytes::from(data_row(&[Some(&7i32.to_be_bytes()), Some(b"ferris")]));
        Row::new(fields, values)
    }

    #[test]
    fn try_get_by_position_and_by_name_agree() {
        let row = two_columns();
        assert_eq!(row.len(), 2);
        assert!(!row.is_empty());
        assert_eq!(row.try_get::<_, i32>(0).unwrap(), 7);
        assert_eq!(row.try_get::<_, String>("name").unwrap(), "ferris");
        assert_eq!(row.try_get::<_, i32>("id").unwrap(), 7);
    }

    #[test]
    fn unknown_column_name_and_out_of_range_index_are_errors() {
        let row = two_columns();
        assert!(matches!(row.try_get::<_, i32>("missing").unwrap_err(), DecodeError::ColumnNotFound(_)));
        assert!(matches!(row.try_get::<_, i32>(5).unwrap_err(), DecodeError::IndexOutOfBounds(5)));
    }

    #[test]
    fn from_row_decodes_tuples_in_column_order() {
        let row = two_columns();
        let (id, name): (i32, String) = row.decode().unwrap();
        assert_eq!(id, 7);
        assert_eq!(name, "ferris");
    }

    #[test]
    fn into_iter_yields_every_column_with_its_name_and_oid() {
        let row = two_columns();
        let columns: Vec<Column> = row.into_iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name(), "id");
        assert_eq!(columns[0].oid(), oid::INT4);
        assert!(!columns[0].is_null());
        assert_eq!(columns[1].name(), "name");
        assert_eq!(columns[1].clone().decode::<String>().unwrap(), "ferris");
    }

    #[test]
    fn a_null_column_is_null_and_has_no_slice() {
        let fields = Bytes::from(row_description(&[("n", oid::INT4)]));
        let values = Bytes::from(data_row(&[None]));
        let row = Row::new(fields, values);
        let column = row.into_iter().next().unwrap().unwrap();
        assert!(column.is_null());
        assert_eq!(column.as_slice(), None);
        assert!(matches!(column.try_into_value().unwrap_err(), DecodeError::Null));
    }

    #[test]
    fn empty_row_reports_zero_len() {
        let fields = Bytes::from(row_description(&[]));
        let values = Bytes::from(data_row(&[]));
        let row = Row::new(fields, values);
        assert!(row.is_empty());
        assert_eq!(row.len(), 0);
        assert_eq!(row.try_get::<_, i32>(0).unwrap_err().to_string(), "failed to decode value: index out of bounds: 0");
    }
}
