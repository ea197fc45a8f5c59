//! `uuid` binary codec (§10.5): 16 raw bytes, no text fallback.
use uuid::Uuid;

use super::{oid, Encode, Oid, PgType};
use crate::row::{Column, Decode, DecodeError};

impl PgType for Uuid {
    const OID: Oid = oid::UUID;
}

impl Encode for Uuid {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }
}

impl Decode for Uuid {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        if col.oid() != Self::OID {
            return Err(DecodeError::OidMismatch { expected: Self::OID, got: col.oid() });
        }
        let bytes = col.try_into_value()?;
        let arr: [u8; 16] = bytes.as_ref().try_into().map_err(|_| DecodeError::BadLength)?;
        Ok(Uuid::from_bytes(arr))
    }
}
