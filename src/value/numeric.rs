//! `numeric` binary codec (§10.5): full NBASE-10000 encoding via [`rust_decimal::Decimal`].
use rust_decimal::Decimal;

use super::{oid, Encode, Oid, PgType};
use crate::row::{Column, Decode, DecodeError};

const NBASE: i128 = 10_000;
const SIGN_POS: u16 = 0x0000;
const SIGN_NEG: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;

impl PgType for Decimal {
    const OID: Oid = oid::NUMERIC;
}

impl Encode for Decimal {
    fn encode(&self, buf: &mut Vec<u8>) {
        let dscale = self.scale() as usize;
        let mantissa = self.mantissa().unsigned_abs();
        let digits = mantissa.to_string();

        let int_len = digits.len().saturating_sub(dscale);
        let (int_part, frac_part) = if int_len == 0 {
            (String::new(), format!("{:0>width$}", digits, width = dscale))
        } else {
            (digits[..int_len].to_string(), digits[int_len..].to_string())
        };

        let int_pad = (4 - int_part.len() % 4) % 4;
        let int_padded = format!("{:0>width$}", int_part, width = int_part.len() + int_pad);
        let frac_pad = (4 - frac_part.len() % 4) % 4;
        let frac_padded = format!("{frac_part}{:0<width$}", "", width = frac_pad);

        let ndigits_int = int_padded.len() / 4;
        let ndigits_frac = frac_padded.len() / 4;

        let mut groups: Vec<i16> = Vec::with_capacity(ndigits_int + ndigits_frac);
        for chunk in int_padded.as_bytes().chunks(4) {
            groups.push(std::str::from_utf8(chunk).unwrap().parse().unwrap());
        }
        for chunk in frac_padded.as_bytes().chunks(4) {
            groups.push(std::str::from_utf8(chunk).unwrap().parse().unwrap());
        }
        // drop leading/trailing all-zero groups, tracking the weight shift
        let mut weight = ndigits_int as i32 - 1;
        let mut start = 0;
        while start < groups.len() && start < ndigits_int && groups[start] == 0 {
            start += 1;
            weight -= 1;
        }
        let mut end = groups.len();
        while end > start && groups[end - 1] == 0 {
            end -= 1;
        }
        let groups = &groups[start..end];

        let sign = if mantissa == 0 {
            SIGN_POS
        } else if self.is_sign_negative() {
            SIGN_NEG
        } else {
            SIGN_POS
        };

        buf.extend_from_slice(&(groups.len() as u16).to_be_bytes());
        buf.extend_from_slice(&(weight as i16).to_be_bytes());
        buf.extend_from_slice(&sign.to_be_bytes());
        buf.extend_from_slice(&(dscale as u16).to_be_bytes());
        for d in groups {
            buf.extend_from_slice(&d.to_be_bytes());
        }
    }
}

impl Decode for Decimal {
    fn decode(col: Column) -> Result<Self, DecodeError> {
        if col.oid() != Self::OID {
            return Err(DecodeError::OidMismatch { expected: Self::OID, got: col.oid() });
        }
        let bytes = col.try_into_value()?;
        if bytes.len() < 8 {
            return Err(DecodeError::BadLength);
        }
        let ndigits = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        let weight = i16::from_be_bytes([bytes[2], bytes[3]]) as i32;
        let sign = u16::from_be_bytes([bytes[4], bytes[5]]);
        let dscale = u16::from_be_bytes([bytes[6], bytes[7]]) as u32;
        if sign == SIGN_NAN {
            return Err(DecodeError::BadLength);
        }
        if bytes.len() != 8 + ndigits * 2 {
            return Err(DecodeError::BadLength);
        }

        let mut n: i128 = 0;
        for i in 0..ndigits {
            let d = u16::from_be_bytes([bytes[8 + i * 2], bytes[8 + i * 2 + 1]]) as i128;
            n = n * NBASE + d;
        }

        // `n` holds `ndigits` base-10000 groups whose most significant group
        // sits at place value 10000^weight; rescale to an integer with
        // exactly `dscale` fractional decimal digits.
        let shift = 4 * (weight - ndigits as i32 + 1) + dscale as i32;
        let unscaled = if shift >= 0 {
            n.checked_mul(10i128.pow(shift as u32)).ok_or(DecodeError::BadLength)?
        } else {
            n / 10i128.pow((-shift) as u32)
        };

        let mut dec =
            Decimal::try_from_i128_with_scale(unscaled, dscale).map_err(|_| DecodeError::BadLength)?;
        if sign == SIGN_NEG {
            dec.set_sign_negative(true);
        }
        Ok(dec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;
    use crate::transport::{data_row, row_description};
    use bytes::Bytes;
    use std::str::FromStr;

    fn round_trip(s: &str) {
        let dec = Decimal::from_str(s).unwrap();
        let mut buf = Vec::new();
        dec.encode(&mut buf);

        let fields = Bytes::from(row_description(&[("n", oid::NUMERIC)]));
        let values = Bytes::from(data_row(&[Some(&buf)]));
        let row = Row::new(fields, values);
        assert_eq!(row.try_get::<_, Decimal>(0).unwrap(), dec, "round trip of {s}");
    }

    #[test]
    fn round_trips_zero_integers_and_fractions() {
        round_trip("0");
        round_trip("1");
        round_trip("12345");
        round_trip("3.14159");
        round_trip("0.0001");
        round_trip("123.456000");
    }

    #[test]
    fn round_trips_negative_and_large_values() {
        round_trip("-42.5");
        round_trip("-0.001");
        round_trip("99999999999999.99999999");
    }

    #[test]
    fn decode_rejects_wrong_oid_truncated_payload_and_nan() {
        let fields = Bytes::from(row_description(&[("n", oid::INT4)]));
        let values = Bytes::from(data_row(&[Some(&1i32.to_be_bytes())]));
        let row = Row::new(fields, values);
        assert!(matches!(row.try_get::<_, Decimal>(0).unwrap_err(), DecodeError::OidMismatch { .. }));

        let fields = Bytes::from(row_description(&[("n", oid::NUMERIC)]));
        let values = Bytes::from(data_row(&[Some(&[0u8; 4])]));
        let row = Row::new(fields, values);
        assert!(matches!(row.try_get::<_, Decimal>(0).unwrap_err(), DecodeError::BadLength));

        let mut nan = Vec::new();
        nan.extend_from_slice(&0u16.to_be_bytes());
        nan.extend_from_slice(&0i16.to_be_bytes());
        nan.extend_from_slice(&SIGN_NAN.to_be_bytes());
        nan.extend_from_slice(&0u16.to_be_bytes());
        let fields = Bytes::from(row_description(&[("n", oid::NUMERIC)]));
        let values = Bytes::from(data_row(&[Some(&nan)]));
        let row = Row::new(fields, values);
        assert!(matches!(row.try_get::<_, Decimal>(0).unwrap_err(), DecodeError::BadLength));
    }
}
