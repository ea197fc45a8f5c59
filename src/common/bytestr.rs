use bytes::Bytes;
use std::{fmt, ops::Deref, str::Utf8Error};

/// A cheaply-clonable, immutable string backed by [`Bytes`].
///
/// Column names and small config strings flow through the wire reader as
/// `Bytes` slices; `ByteStr` lets them stay that way instead of forcing an
/// allocation into `String` on every row.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ByteStr(Bytes);

impl ByteStr {
    /// Validate `bytes` as UTF-8 and wrap it.
    pub fn from_utf8(bytes: Bytes) -> Result<Self, Utf8Error> {
        std::str::from_utf8(&bytes)?;
        Ok(Self(bytes))
    }

    /// Copy `s` into an owned, ref-counted buffer.
    pub fn copy_from_str(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Wrap a `'static` string with no allocation.
    pub fn from_static(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }

    /// Slice a sub-`&str` of `self` back into a zero-copy `ByteStr`.
    ///
    /// Panics if `sub` does not point into `self`'s backing storage.
    pub fn slice_ref(&self, sub: &str) -> Self {
        Self(self.0.slice_ref(sub.as_bytes()))
    }

    /// Borrow the validated string.
    pub fn as_str(&self) -> &str {
        // SAFETY: validated as UTF-8 at construction and never mutated.
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }
}

impl Deref for ByteStr {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for ByteStr {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<&str> for ByteStr {
    fn from(s: &str) -> Self {
        Self::copy_from_str(s)
    }
}

impl From<String> for ByteStr {
    fn from(s: String) -> Self {
        Self(Bytes::from(s.into_bytes()))
    }
}

impl fmt::Display for ByteStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ByteStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_utf8_validates_and_rejects_bad_bytes() {
        let s = ByteStr::from_utf8(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(&*s, "hello");
        assert!(ByteStr::from_utf8(Bytes::from_static(&[0xff, 0xfe])).is_err());
    }

    #[test]
    fn copy_from_str_and_from_static_agree() {
        assert_eq!(ByteStr::copy_from_str("abc").as_str(), "abc");
        assert_eq!(ByteStr::from_static("abc").as_str(), "abc");
        assert_eq!(ByteStr::copy_from_str("abc"), ByteStr::from_static("abc"));
    }

    #[test]
    fn slice_ref_reuses_the_backing_buffer() {
        let whole = ByteStr::copy_from_str("hello world");
        let sub = whole.slice_ref(&whole[6..]);
        assert_eq!(sub.as_str(), "world");
    }

    #[test]
    fn deref_and_display_expose_the_validated_str() {
        let s: ByteStr = "ferris".into();
        assert_eq!(format!("{s}"), "ferris");
        assert_eq!(s.len(), 6);
    }
}
