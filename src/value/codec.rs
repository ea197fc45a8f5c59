use super::{oid, Date, Encode, Interval, Oid, PgType, Time, Timestamp};
use crate::row::{Column, Decode, DecodeError};

macro_rules! int_codec {
    ($ty:ty, $oid:expr) => {
        impl PgType for $ty {
            const OID: Oid = $oid;
        }

        impl Encode for $ty {
            fn encode(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_be_bytes());
            }
        }

        impl Decode for $ty {
            fn decode(col: Column) -> Result<Self, DecodeError> {
                if col.oid() != Self::OID {
                    return Err(DecodeError::OidMismatch { expected: Self::OID, got: col.oid() });
                }
                let bytes = col.try_into_value()?;
                if bytes.len() != size_of::<Self>() {
                    return Err(DecodeError::BadLength);
                }
                let mut be = [0u8; size_of::<Self>()];
                be.copy_from_slice(&bytes);
                Ok(<$ty>::from_be_bytes(be))
            }
        }
    };
}

int_codec!(i16, oid::INT2);
int_codec!(i32, oid::INT4);
int_codec!(i64, oid::INT8);
int_codec!(f32, oid::FLOAT4);
int_codec!(f64, oid::FLOAT8);

/// PostgreSQL's `oid` type is an unsigned 4-byte integer, distinct from `int4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgOid(pub u32);

impl PgType for PgOid {
    const OID: Oid = oid::OID;
}

impl Encode for PgOid {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0.to_be_bytes());
    }
}

impl Decode for PgOid {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        if col.oid() != Self::OID {
            return Err(DecodeError::OidMismatch { expected: Self::OID, got: col.oid() });
        }
        let bytes = col.try_into_value()?;
        let mut be = [0u8; 4];
        be.copy_from_slice(&bytes);
        Ok(PgOid(u32::from_be_bytes(be)))
    }
}

impl PgType for bool {
    const OID: Oid = oid::BOOL;
}

impl Encode for bool {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(*self as u8);
    }
}

impl Decode for bool {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        if col.oid() != Self::OID {
            return Err(DecodeError::OidMismatch { expected: Self::OID, got: col.oid() });
        }
        let bytes = col.try_into_value()?;
        Ok(bytes.first().copied().unwrap_or(0) != 0)
    }
}

impl PgType for str {
    const OID: Oid = oid::TEXT;
}

impl Encode for str {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }
}

impl PgType for String {
    const OID: Oid = oid::TEXT;
}

impl Encode for String {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }
}

impl Encode for &str {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }
}

impl PgType for &str {
    const OID: Oid = oid::TEXT;
}

impl Decode for String {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        if col.oid() != oid::TEXT && col.oid() != oid::VARCHAR {
            return Err(DecodeError::OidMismatch { expected: Self::OID, got: col.oid() });
        }
        Ok(String::from_utf8(col.try_into_value()?.into())?)
    }
}

/// Raw bytea payload, distinct from `String` so callers don't need a wrapper
/// type for binary columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bytea(pub Vec<u8>);

impl PgType for Bytea {
    const OID: Oid = oid::BYTEA;
}

impl Encode for Bytea {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0);
    }
}

impl Decode for Bytea {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        if col.oid() != Self::OID {
            return Err(DecodeError::OidMismatch { expected: Self::OID, got: col.oid() });
        }
        Ok(Bytea(col.try_into_value()?.into()))
    }
}

const PG_EPOCH_DAYS_FROM_UNIX: i64 = 10_957; // 2000-01-01 in days since 1970-01-01

impl PgType for Date {
    const OID: Oid = oid::DATE;
}

impl Encode for Date {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0.to_be_bytes());
    }
}

impl Decode for Date {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        if col.oid() != Self::OID {
            return Err(DecodeError::OidMismatch { expected: Self::OID, got: col.oid() });
        }
        let bytes = col.try_into_value()?;
        let mut be = [0u8; 4];
        be.copy_from_slice(&bytes);
        Ok(Date(i32::from_be_bytes(be)))
    }
}

impl Date {
    pub fn from_unix_days(unix_days: i64) -> Self {
        Date((unix_days - PG_EPOCH_DAYS_FROM_UNIX) as i32)
    }

    pub fn to_unix_days(self) -> i64 {
        self.0 as i64 + PG_EPOCH_DAYS_FROM_UNIX
    }
}

impl PgType for Time {
    const OID: Oid = oid::TIME;
}

impl Encode for Time {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0.to_be_bytes());
    }
}

impl Decode for Time {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        if col.oid() != Self::OID {
            return Err(DecodeError::OidMismatch { expected: Self::OID, got: col.oid() });
        }
        let bytes = col.try_into_value()?;
        let mut be = [0u8; 8];
        be.copy_from_slice(&bytes);
        Ok(Time(i64::from_be_bytes(be)))
    }
}

impl PgType for Timestamp {
    const OID: Oid = oid::TIMESTAMP;
}

impl Encode for Timestamp {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0.to_be_bytes());
    }
}

impl Decode for Timestamp {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        if col.oid() != Self::OID {
            return Err(DecodeError::OidMismatch { expected: Self::OID, got: col.oid() });
        }
        let bytes = col.try_into_value()?;
        let mut be = [0u8; 8];
        be.copy_from_slice(&bytes);
        Ok(Timestamp(i64::from_be_bytes(be)))
    }
}

impl PgType for Interval {
    const OID: Oid = oid::INTERVAL;
}

impl Encode for Interval {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.microseconds.to_be_bytes());
        buf.extend_from_slice(&self.days.to_be_bytes());
        buf.extend_from_slice(&self.months.to_be_bytes());
    }
}

impl Decode for Interval {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        if col.oid() != Self::OID {
            return Err(DecodeError::OidMismatch { expected: Self::OID, got: col.oid() });
        }
        let bytes = col.try_into_value()?;
        if bytes.len() != 16 {
            return Err(DecodeError::BadLength);
        }
        let microseconds = i64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let days = i32::from_be_bytes(bytes[8..12].try_into().unwrap());
        let months = i32::from_be_bytes(bytes[12..16].try_into().unwrap());
        Ok(Interval { microseconds, days, months })
    }
}
