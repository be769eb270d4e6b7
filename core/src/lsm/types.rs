//! Core types for the LSM tree.

use bytes::Bytes;

/// Key type - variable length bytes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Key(pub Bytes);

impl Key {
    pub fn new(data: Bytes) -> Self {
        Self(data)
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for Key {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::from_slice(s.as_bytes())
    }
}

impl From<Vec<u8>> for Key {
    fn from(data: Vec<u8>) -> Self {
        Self(Bytes::from(data))
    }
}

impl From<Bytes> for Key {
    fn from(data: Bytes) -> Self {
        Self(data)
    }
}

impl<const N: usize> From<&[u8; N]> for Key {
    fn from(data: &[u8; N]) -> Self {
        Self::from_slice(data)
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Value type - variable length bytes.
///
/// An empty value is a tombstone: it marks the key as deleted and shadows
/// any older value held by an older memtable.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Value(pub Bytes);

impl Value {
    pub fn new(data: Bytes) -> Self {
        Self(data)
    }

    /// The deletion marker.
    pub fn tombstone() -> Self {
        Self(Bytes::new())
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if this value is a delete marker.
    pub fn is_tombstone(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for Value {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::from_slice(s.as_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(data: Vec<u8>) -> Self {
        Self(Bytes::from(data))
    }
}

impl From<Bytes> for Value {
    fn from(data: Bytes) -> Self {
        Self(data)
    }
}

impl<const N: usize> From<&[u8; N]> for Value {
    fn from(data: &[u8; N]) -> Self {
        Self::from_slice(data)
    }
}

impl AsRef<[u8]> for Value {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A key/value pair read out of a memtable or a merged scan.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    pub key: Key,
    pub value: Value,
}

impl Entry {
    pub fn new(key: Key, value: Value) -> Self {
        Self { key, value }
    }

    /// Returns true if this is a tombstone (delete marker).
    pub fn is_tombstone(&self) -> bool {
        self.value.is_tombstone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_is_lexicographic() {
        assert!(Key::from("a") < Key::from("ab"));
        assert!(Key::from("ab") < Key::from("b"));
        assert!(Key::from("") < Key::from("a"));
    }

    #[test]
    fn test_empty_value_is_tombstone() {
        assert!(Value::tombstone().is_tombstone());
        assert!(Value::from("").is_tombstone());
        assert!(!Value::from("v").is_tombstone());

        let entry = Entry::new(Key::from("k"), Value::tombstone());
        assert!(entry.is_tombstone());
    }
}
