//! Binary shard formats.
//!
//! Password shard (`passwords/<kk>.pw`):
//!
//! ```text
//! "PFPW" | version u8 | key u8 | count u32le | count * (len u8, bytes) | md5[16]
//! ```
//!
//! Result shard (`essids/<essid-hex>/<kk>.pmk`):
//!
//! ```text
//! "PFRS" | version u8 | key u8 | essid_len u8 | essid | source fingerprint[16]
//!        | count u32le | count * (len u8, password, pmk[32]) | md5[16]
//! ```
//!
//! Entries are sorted by password bytes and unique. The trailer is the MD5
//! digest of every preceding byte; it doubles as the revision identity of
//! the file.

use std::path::Path;

use md5::{Digest, Md5};

use crate::error::StorageError;
use crate::model::{Essid, Password, Pmk};
use crate::shard::{Fingerprint, ShardKey};

pub const PASSWORD_MAGIC: &[u8; 4] = b"PFPW";
pub const RESULT_MAGIC: &[u8; 4] = b"PFRS";
pub const SHARD_VERSION: u8 = 1;
const TRAILER_LEN: usize = 16;

/// Largest result header: magic, version, key, essid len, essid, fingerprint, count.
pub const RESULT_HEADER_MAX: usize = 4 + 1 + 1 + 1 + 32 + 16 + 4;
pub const PASSWORD_HEADER_LEN: usize = 4 + 1 + 1 + 4;

/// The unique candidates sharing one shard key, sorted by bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordShard {
    pub key: ShardKey,
    passwords: Vec<Password>,
}

impl PasswordShard {
    /// Sorts and deduplicates `passwords`. Every password must map to `key`.
    pub fn new(key: ShardKey, mut passwords: Vec<Password>) -> Self {
        passwords.sort_unstable();
        passwords.dedup();
        debug_assert!(passwords.iter().all(|pw| ShardKey::of(pw) == key));
        Self { key, passwords }
    }

    pub fn passwords(&self) -> &[Password] {
        &self.passwords
    }

    pub fn into_passwords(self) -> Vec<Password> {
        self.passwords
    }

    pub fn len(&self) -> usize {
        self.passwords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passwords.is_empty()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_passwords(&self.passwords)
    }
}

/// PMKs of one password shard for one ESSID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultShard {
    pub essid: Essid,
    pub key: ShardKey,
    /// Fingerprint of the password shard revision these results cover
    pub source: Fingerprint,
    entries: Vec<(Password, Pmk)>,
}

impl ResultShard {
    pub fn new(
        essid: Essid,
        key: ShardKey,
        source: Fingerprint,
        mut entries: Vec<(Password, Pmk)>,
    ) -> Self {
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|a, b| a.0 == b.0);
        Self {
            essid,
            key,
            source,
            entries,
        }
    }

    pub fn entries(&self) -> &[(Password, Pmk)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(Password, Pmk)> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, password: &Password) -> Option<&Pmk> {
        self.entries
            .binary_search_by(|(pw, _)| pw.cmp(password))
            .ok()
            .map(|i| &self.entries[i].1)
    }

    /// True when the results were computed from exactly this shard revision.
    pub fn covers(&self, shard: &PasswordShard) -> bool {
        self.key == shard.key && self.source == shard.fingerprint()
    }
}

/// Header fields of a result shard, readable without decoding entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultHeader {
    pub essid: Essid,
    pub key: ShardKey,
    pub source: Fingerprint,
    pub count: u32,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let out = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    fn u8(&mut self) -> Option<u8> {
        self.bytes(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.bytes(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }
}

fn push_trailer(out: &mut Vec<u8>) {
    let digest = Md5::digest(&out[..]);
    out.extend_from_slice(&digest);
}

/// Split off and check the MD5 trailer.
fn checked_body<'a>(bytes: &'a [u8], path: &Path) -> Result<&'a [u8], StorageError> {
    if bytes.len() < TRAILER_LEN {
        return Err(StorageError::corrupt(path, "file too short"));
    }
    let (body, trailer) = bytes.split_at(bytes.len() - TRAILER_LEN);
    if Md5::digest(body)[..] != trailer[..] {
        return Err(StorageError::corrupt(path, "checksum mismatch"));
    }
    Ok(body)
}

/// Revision identity of an encoded shard (its trailer).
pub fn revision(bytes: &[u8]) -> Option<[u8; 16]> {
    let start = bytes.len().checked_sub(TRAILER_LEN)?;
    bytes[start..].try_into().ok()
}

fn check_magic(r: &mut Reader<'_>, magic: &[u8; 4], path: &Path) -> Result<ShardKey, StorageError> {
    let truncated = || StorageError::corrupt(path, "truncated header");
    if r.bytes(4).ok_or_else(truncated)? != magic {
        return Err(StorageError::corrupt(path, "bad magic"));
    }
    let version = r.u8().ok_or_else(truncated)?;
    if version != SHARD_VERSION {
        return Err(StorageError::corrupt(
            path,
            format!("unsupported shard version {}", version),
        ));
    }
    Ok(ShardKey::from_index(r.u8().ok_or_else(truncated)?))
}

fn read_password(r: &mut Reader<'_>, path: &Path) -> Result<Password, StorageError> {
    let len = r
        .u8()
        .ok_or_else(|| StorageError::corrupt(path, "truncated entry"))?;
    let bytes = r
        .bytes(len as usize)
        .ok_or_else(|| StorageError::corrupt(path, "truncated entry"))?;
    Password::new(bytes.to_vec())
        .map_err(|e| StorageError::corrupt(path, format!("invalid entry: {}", e)))
}

pub fn encode_password_shard(shard: &PasswordShard) -> Vec<u8> {
    let payload: usize = shard.passwords.iter().map(|pw| 1 + pw.len()).sum();
    let mut out = Vec::with_capacity(PASSWORD_HEADER_LEN + payload + TRAILER_LEN);
    out.extend_from_slice(PASSWORD_MAGIC);
    out.push(SHARD_VERSION);
    out.push(shard.key.index() as u8);
    out.extend_from_slice(&(shard.passwords.len() as u32).to_le_bytes());
    for pw in &shard.passwords {
        out.push(pw.len() as u8);
        out.extend_from_slice(pw.as_bytes());
    }
    push_trailer(&mut out);
    out
}

pub fn decode_password_shard(bytes: &[u8], path: &Path) -> Result<PasswordShard, StorageError> {
    let body = checked_body(bytes, path)?;
    let mut r = Reader::new(body);
    let key = check_magic(&mut r, PASSWORD_MAGIC, path)?;
    let count = r
        .u32()
        .ok_or_else(|| StorageError::corrupt(path, "truncated header"))?;

    let mut passwords = Vec::with_capacity((count as usize).min(1 << 20));
    for _ in 0..count {
        let pw = read_password(&mut r, path)?;
        if passwords.last().is_some_and(|prev: &Password| prev >= &pw) {
            return Err(StorageError::corrupt(path, "entries out of order"));
        }
        passwords.push(pw);
    }
    if !r.is_empty() {
        return Err(StorageError::corrupt(path, "trailing bytes"));
    }
    Ok(PasswordShard { key, passwords })
}

/// Entry count of a password shard from its header.
pub fn password_shard_count(header: &[u8], path: &Path) -> Result<u32, StorageError> {
    let mut r = Reader::new(header);
    check_magic(&mut r, PASSWORD_MAGIC, path)?;
    r.u32()
        .ok_or_else(|| StorageError::corrupt(path, "truncated header"))
}

pub fn encode_result_shard(shard: &ResultShard) -> Vec<u8> {
    let essid = shard.essid.as_bytes();
    let payload: usize = shard.entries.iter().map(|(pw, _)| 1 + pw.len() + 32).sum();
    let mut out = Vec::with_capacity(RESULT_HEADER_MAX + payload + TRAILER_LEN);
    out.extend_from_slice(RESULT_MAGIC);
    out.push(SHARD_VERSION);
    out.push(shard.key.index() as u8);
    out.push(essid.len() as u8);
    out.extend_from_slice(essid);
    out.extend_from_slice(&shard.source.0);
    out.extend_from_slice(&(shard.entries.len() as u32).to_le_bytes());
    for (pw, pmk) in &shard.entries {
        out.push(pw.len() as u8);
        out.extend_from_slice(pw.as_bytes());
        out.extend_from_slice(pmk);
    }
    push_trailer(&mut out);
    out
}

fn read_result_header(r: &mut Reader<'_>, path: &Path) -> Result<ResultHeader, StorageError> {
    let key = check_magic(r, RESULT_MAGIC, path)?;
    let truncated = || StorageError::corrupt(path, "truncated header");
    let essid_len = r.u8().ok_or_else(truncated)?;
    let essid = Essid::new(r.bytes(essid_len as usize).ok_or_else(truncated)?.to_vec())
        .map_err(|e| StorageError::corrupt(path, format!("invalid ESSID: {}", e)))?;
    let mut source = [0u8; 16];
    source.copy_from_slice(r.bytes(16).ok_or_else(truncated)?);
    let count = r.u32().ok_or_else(truncated)?;
    Ok(ResultHeader {
        essid,
        key,
        source: Fingerprint(source),
        count,
    })
}

/// Decode only the header; `bytes` may be a prefix of the file.
pub fn decode_result_header(bytes: &[u8], path: &Path) -> Result<ResultHeader, StorageError> {
    read_result_header(&mut Reader::new(bytes), path)
}

pub fn decode_result_shard(bytes: &[u8], path: &Path) -> Result<ResultShard, StorageError> {
    let body = checked_body(bytes, path)?;
    let mut r = Reader::new(body);
    let header = read_result_header(&mut r, path)?;

    let mut entries: Vec<(Password, Pmk)> =
        Vec::with_capacity((header.count as usize).min(1 << 20));
    for _ in 0..header.count {
        let pw = read_password(&mut r, path)?;
        let mut pmk = [0u8; 32];
        pmk.copy_from_slice(
            r.bytes(32)
                .ok_or_else(|| StorageError::corrupt(path, "truncated entry"))?,
        );
        if entries.last().is_some_and(|(prev, _)| prev >= &pw) {
            return Err(StorageError::corrupt(path, "entries out of order"));
        }
        entries.push((pw, pmk));
    }
    if !r.is_empty() {
        return Err(StorageError::corrupt(path, "trailing bytes"));
    }
    Ok(ResultShard {
        essid: header.essid,
        key: header.key,
        source: header.source,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passwords_in(key: ShardKey, n: usize) -> Vec<Password> {
        (0..)
            .map(|i| Password::new(format!("candidate{:05}", i).into_bytes()).unwrap())
            .filter(|pw| ShardKey::of(pw) == key)
            .take(n)
            .collect()
    }

    #[test]
    fn test_password_shard_encoding() {
        let key = ShardKey::from_index(0x42);
        let shard = PasswordShard::new(key, passwords_in(key, 5));
        let bytes = encode_password_shard(&shard);

        assert_eq!(&bytes[..4], PASSWORD_MAGIC);
        assert_eq!(password_shard_count(&bytes[..PASSWORD_HEADER_LEN], Path::new("x")).unwrap(), 5);

        let decoded = decode_password_shard(&bytes, Path::new("x")).unwrap();
        assert_eq!(decoded, shard);
    }

    #[test]
    fn test_password_shard_dedups_and_sorts() {
        let key = ShardKey::from_index(0x07);
        let mut pws = passwords_in(key, 3);
        pws.reverse();
        pws.push(pws[0].clone());
        let shard = PasswordShard::new(key, pws);
        assert_eq!(shard.len(), 3);
        assert!(shard.passwords().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_corruption_detected() {
        let key = ShardKey::from_index(0x10);
        let shard = PasswordShard::new(key, passwords_in(key, 3));
        let mut bytes = encode_password_shard(&shard);
        bytes[12] ^= 0xff;
        let err = decode_password_shard(&bytes, Path::new("x")).unwrap_err();
        assert!(err.is_corrupt());

        let err = decode_password_shard(&bytes[..8], Path::new("x")).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_result_shard_encoding() {
        let key = ShardKey::from_index(0x99);
        let pws = passwords_in(key, 4);
        let source = Fingerprint::of_passwords(&pws);
        let entries = pws.iter().map(|pw| (pw.clone(), [pw.len() as u8; 32])).collect();
        let essid: Essid = "linksys".parse().unwrap();
        let shard = ResultShard::new(essid.clone(), key, source, entries);

        let bytes = encode_result_shard(&shard);
        let header = decode_result_header(&bytes[..RESULT_HEADER_MAX.min(bytes.len())], Path::new("x")).unwrap();
        assert_eq!(header.essid, essid);
        assert_eq!(header.count, 4);
        assert_eq!(header.source, source);

        let decoded = decode_result_shard(&bytes, Path::new("x")).unwrap();
        assert_eq!(decoded, shard);
        assert_eq!(decoded.get(&pws[1]), Some(&[pws[1].len() as u8; 32]));
        assert!(revision(&bytes).is_some());
    }

    #[test]
    fn test_covers_tracks_fingerprint() {
        let key = ShardKey::from_index(0x01);
        let pws = passwords_in(key, 3);
        let shard = PasswordShard::new(key, pws[..2].to_vec());
        let result = ResultShard::new(
            "net".parse().unwrap(),
            key,
            shard.fingerprint(),
            Vec::new(),
        );
        assert!(result.covers(&shard));

        let grown = PasswordShard::new(key, pws);
        assert!(!result.covers(&grown));
    }
}
