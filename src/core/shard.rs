//! Shard addressing.
//!
//! Password shards and result shards share one address space: the first
//! byte of the MD5 digest of the password bytes. Both namespaces go
//! through [`ShardKey::of`], so a result shard always correlates with the
//! password shard holding the same passwords.

use std::fmt;

use md5::{Digest, Md5};

use crate::model::Password;

/// Number of addressable shards.
pub const SHARD_COUNT: usize = 256;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardKey(u8);

impl ShardKey {
    pub fn of(password: &Password) -> Self {
        let digest = Md5::digest(password.as_bytes());
        ShardKey(digest[0])
    }

    pub fn from_index(index: u8) -> Self {
        ShardKey(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn to_hex(self) -> String {
        format!("{:02x}", self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 2 {
            return None;
        }
        u8::from_str_radix(s, 16).ok().map(ShardKey)
    }

    /// All keys in ascending order.
    pub fn all() -> impl Iterator<Item = ShardKey> {
        (0..=u8::MAX).map(ShardKey)
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.0)
    }
}

impl fmt::Debug for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShardKey({:02x})", self.0)
    }
}

/// Content digest of one revision of a password shard.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint(pub [u8; 16]);

impl Fingerprint {
    /// Digest over the canonical (sorted, length-prefixed) password list.
    pub fn of_passwords<'a>(passwords: impl IntoIterator<Item = &'a Password>) -> Self {
        let mut hasher = Md5::new();
        for pw in passwords {
            hasher.update([pw.len() as u8]);
            hasher.update(pw.as_bytes());
        }
        Fingerprint(hasher.finalize().into())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_key_is_stable() {
        let a: Password = "dictionary".parse().unwrap();
        let b: Password = "dictionary".parse().unwrap();
        assert_eq!(ShardKey::of(&a), ShardKey::of(&b));
    }

    #[test]
    fn test_shard_key_hex() {
        let key = ShardKey::from_index(0x0a);
        assert_eq!(key.to_hex(), "0a");
        assert_eq!(ShardKey::from_hex("0a"), Some(key));
        assert_eq!(ShardKey::from_hex("a"), None);
        assert_eq!(ShardKey::from_hex("zz"), None);
        assert_eq!(ShardKey::all().count(), SHARD_COUNT);
    }

    #[test]
    fn test_fingerprint_depends_on_content() {
        let a: Password = "aaaaaaaa".parse().unwrap();
        let b: Password = "bbbbbbbb".parse().unwrap();
        let f1 = Fingerprint::of_passwords([&a]);
        let f2 = Fingerprint::of_passwords([&a, &b]);
        assert_ne!(f1, f2);
        assert_eq!(f2, Fingerprint::of_passwords([&a, &b]));
    }
}
