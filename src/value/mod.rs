//! Host value ↔ PostgreSQL wire value codecs (§4.2).
mod codec;
mod numeric;
mod uuid_codec;

#[cfg(feature = "json")]
pub mod json;
#[cfg(feature = "time")]
mod time_impl;

#[cfg(feature = "json")]
pub use json::Json;

/// PostgreSQL object identifier.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;

pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const JSON: Oid = 114;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const UNKNOWN: Oid = 705;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIME: Oid = 1083;
    pub const TIMESTAMP: Oid = 1114;
    pub const INTERVAL: Oid = 1186;
    pub const NUMERIC: Oid = 1700;
    pub const UUID: Oid = 2950;
    pub const JSONB: Oid = 3802;
}

/// A type that has a corresponding PostgreSQL OID.
pub trait PgType {
    const OID: Oid;
}

/// A host value that can be bound as a query parameter.
///
/// Every parameter is sent in binary format per §4.2, including `Json`:
/// jsonb's binary representation is byte-identical to the text one save for
/// a leading version byte, so there is no text-format overload to choose from.
pub trait Encode: PgType {
    /// `true` if this value should be bound as SQL `NULL` (length = -1).
    fn is_null(&self) -> bool {
        false
    }

    /// Append the wire representation of `self` to `buf`. Never called when [`Encode::is_null`].
    fn encode(&self, buf: &mut Vec<u8>);
}

/// Host-side newtypes for date/time values with no external crate dependency.
///
/// Each stores the exact on-wire unit so encode/decode is a straight copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Date(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub i64);

/// Lossy host representation of `interval`: months and days kept as reported
/// by the server; normalized-to-microseconds accessors exist for round-trip
/// comparisons (§8 P1, interval case).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub microseconds: i64,
    pub days: i32,
    pub months: i32,
}

impl Interval {
    /// Normalize to a single microsecond count, treating a day as 24h and a
    /// month as 30 days — the lossy choice §4.2/§8 call out as documented
    /// and testable rather than calendar-exact.
    pub fn normalized_microseconds(&self) -> i64 {
        self.microseconds
            + (self.days as i64) * 24 * 3_600_000_000
            + (self.months as i64) * 30 * 24 * 3_600_000_000
    }
}

/// An encoded query parameter ready to be placed into a `Bind` message.
pub struct EncodedParam {
    pub oid: Oid,
    pub bytes: Option<Vec<u8>>,
}

/// Encode a single bindable value (or `NULL`) into an [`EncodedParam`].
pub fn encode_param<T: Encode>(value: &T) -> EncodedParam {
    if value.is_null() {
        return EncodedParam { oid: T::OID, bytes: None };
    }
    let mut buf = Vec::new();
    value.encode(&mut buf);
    EncodedParam { oid: T::OID, bytes: Some(buf) }
}

impl<T: Encode> PgType for Option<T> {
    const OID: Oid = T::OID;
}

impl<T: Encode> Encode for Option<T> {
    fn is_null(&self) -> bool {
        self.is_none()
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        if let Some(v) = self {
            v.encode(buf);
        }
    }
}

/// A tuple of bindable values, converted into an ordered parameter list.
pub trait IntoParams {
    fn into_params(self) -> Vec<EncodedParam>;
}

impl IntoParams for () {
    fn into_params(self) -> Vec<EncodedParam> {
        Vec::new()
    }
}

macro_rules! into_params_tuple {
    ($($t:ident $i:tt),+) => {
        impl<$($t: Encode),+> IntoParams for ($($t,)+) {
            fn into_params(self) -> Vec<EncodedParam> {
                vec![$(encode_param(&self.$i)),+]
            }
        }
    };
}

into_params_tuple!(T0 0);
into_params_tuple!(T0 0, T1 1);
into_params_tuple!(T0 0, T1 1, T2 2);
into_params_tuple!(T0 0, T1 1, T2 2, T3 3);
into_params_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4);
into_params_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4, T5 5);
