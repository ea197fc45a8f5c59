//! Small helper traits used throughout the message codec.
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::common::ByteStr;

/// PostgreSQL mixes `u16`/`u32`/`i32` length fields across message kinds;
/// this trait centralizes the narrowing casts and panics loudly instead of
/// wrapping on overflow (a wrapped length would desync the wire reader).
pub trait UsizeExt {
    fn to_u32(self) -> u32;
    fn to_u16(self) -> u16;
    fn to_i32(self) -> i32;
}

/// Nul-terminated string helpers on the write side.
pub trait StrExt {
    /// String length plus the nul terminator (1).
    fn nul_string_len(&self) -> u32;
}

/// Nul-terminated string helpers on [`BufMut`].
pub trait BufMutExt {
    /// Write `string` followed by a nul terminator.
    fn put_nul_string(&mut self, string: &str);
}

/// Nul-terminated string helpers on owned byte buffers.
pub trait BytesExt {
    /// Read a nul-terminated string, splitting it (and the nul) off the front.
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, std::str::Utf8Error>;
}

/// Lossily [`Display`][std::fmt::Display] a byte slice, hex-escaping anything non-printable.
pub trait FmtExt {
    fn lossy(&self) -> LossyFmt<'_>;
}

pub struct LossyFmt<'a>(pub &'a [u8]);

impl UsizeExt for usize {
    fn to_u32(self) -> u32 {
        self.try_into().expect("message size too large for the wire protocol")
    }

    fn to_u16(self) -> u16 {
        self.try_into().expect("message size too large for the wire protocol")
    }

    fn to_i32(self) -> i32 {
        self.try_into().expect("message size too large for the wire protocol")
    }
}

impl StrExt for str {
    fn nul_string_len(&self) -> u32 {
        self.len().to_u32() + 1
    }
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

impl BytesExt for Bytes {
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, std::str::Utf8Error> {
        let end = self
            .iter()
            .position(|e| *e == b'\0')
            .expect("backend string was not nul terminated");
        let me = self.split_to(end);
        Buf::advance(self, 1);
        ByteStr::from_utf8(me)
    }
}

impl BytesExt for BytesMut {
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, std::str::Utf8Error> {
        let end = self
            .iter()
            .position(|e| *e == b'\0')
            .expect("backend string was not nul terminated");
        let me = self.split_to(end);
        Buf::advance(self, 1);
        ByteStr::from_utf8(me.freeze())
    }
}

impl FmtExt for [u8] {
    fn lossy(&self) -> LossyFmt<'_> {
        LossyFmt(self)
    }
}

impl std::fmt::Display for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in self.0 {
            if b.is_ascii_graphic() || b.is_ascii_whitespace() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b\"{self}\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usize_narrowing_casts_succeed_within_range() {
        assert_eq!(4usize.to_u32(), 4u32);
        assert_eq!(4usize.to_u16(), 4u16);
        assert_eq!(4usize.to_i32(), 4i32);
    }

    #[test]
    #[should_panic]
    fn usize_narrowing_cast_panics_on_overflow() {
        (u16::MAX as usize + 1).to_u16();
    }

    #[test]
    fn nul_string_len_counts_the_terminator() {
        assert_eq!("abc".nul_string_len(), 4);
        assert_eq!("".nul_string_len(), 1);
    }

    #[test]
    fn put_nul_string_appends_a_trailing_zero_byte() {
        let mut buf = BytesMut::new();
        buf.put_nul_string("hi");
        assert_eq!(&buf[..], b"hi\0");
    }

    #[test]
    fn get_nul_bytestr_splits_off_the_string_and_consumes_the_nul() {
        let mut bytes = Bytes::from_static(b"hello\0world");
        let s = bytes.get_nul_bytestr().unwrap();
        assert_eq!(s.as_str(), "hello");
        assert_eq!(&bytes[..], b"world");

        let mut bytes_mut = BytesMut::from(&b"foo\0bar"[..]);
        let s = bytes_mut.get_nul_bytestr().unwrap();
        assert_eq!(s.as_str(), "foo");
        assert_eq!(&bytes_mut[..], b"bar");
    }

    #[test]
    fn lossy_escapes_non_printable_bytes() {
        let rendered = [b'a', 0x00, b'b'].lossy().to_string();
        assert_eq!(rendered, "a\\x00b");
    }
}
