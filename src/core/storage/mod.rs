/*!
 * Sharded, content-addressed storage
 *
 * Layout under the storage root:
 * - `format.json`: format marker (`{"version": 1}`)
 * - `passwords/<kk>.pw`: unique candidates of shard key `kk`
 * - `essids/<essid-hex>/<kk>.pmk`: PMKs of password shard `kk` for that ESSID
 *
 * Every file is replaced atomically (temp file + rename), so readers only
 * ever observe complete shards. Writers serialize on per-shard locks; ESSID
 * deletion takes the ESSID lock exclusively while result writes share it.
 */

mod codec;

pub use codec::{PasswordShard, ResultHeader, ResultShard};

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError, ValidationError};
use crate::model::{Essid, Password};
use crate::shard::{ShardKey, SHARD_COUNT};
use crate::source::read_line;

/// On-disk layout version written to `format.json`.
pub const FORMAT_VERSION: u32 = 1;

const FORMAT_FILE: &str = "format.json";
const PASSWORDS_DIR: &str = "passwords";
const ESSIDS_DIR: &str = "essids";
const PASSWORD_EXT: &str = "pw";
const RESULT_EXT: &str = "pmk";

const DEFAULT_IMPORT_CHUNK: usize = 100_000;

#[derive(Debug, Serialize, Deserialize)]
struct FormatMarker {
    version: u32,
}

/// Outcome of one import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    /// New unique passwords stored
    pub accepted: u64,
    /// Lines with an invalid length
    pub rejected: u64,
    /// Valid lines already stored or repeated within the input
    pub duplicate: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EssidInfo {
    pub essid: Essid,
    pub result_shards: usize,
    pub pmks: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub password_shards: usize,
    pub passwords: u64,
    pub essids: Vec<EssidInfo>,
}

pub struct StorageEngine {
    root: PathBuf,
    import_chunk: usize,
    password_locks: Vec<Mutex<()>>,
    essid_locks: Mutex<HashMap<Essid, Arc<RwLock<()>>>>,
    result_locks: Mutex<HashMap<(Essid, ShardKey), Arc<Mutex<()>>>>,
    /// Result cursor of this session: revision last yielded per shard.
    delivered: Mutex<HashMap<Essid, HashMap<ShardKey, [u8; 16]>>>,
}

impl StorageEngine {
    /// Open (or initialize) the storage rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        for dir in [root.join(PASSWORDS_DIR), root.join(ESSIDS_DIR)] {
            fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        }

        let marker = root.join(FORMAT_FILE);
        match read_optional(&marker)? {
            Some(bytes) => {
                let found: FormatMarker = serde_json::from_slice(&bytes)
                    .map_err(|e| StorageError::corrupt(&marker, e.to_string()))?;
                if found.version != FORMAT_VERSION {
                    return Err(StorageError::Format {
                        path: marker,
                        expected: FORMAT_VERSION,
                        found: found.version,
                    });
                }
            }
            None => {
                let json = serde_json::to_vec(&FormatMarker {
                    version: FORMAT_VERSION,
                })
                .map_err(|e| StorageError::corrupt(&marker, e.to_string()))?;
                write_atomic(&root, &marker, &json)?;
            }
        }

        info!(path = %root.display(), "storage opened");
        Ok(Self {
            root,
            import_chunk: DEFAULT_IMPORT_CHUNK,
            password_locks: (0..SHARD_COUNT).map(|_| Mutex::new(())).collect(),
            essid_locks: Mutex::new(HashMap::new()),
            result_locks: Mutex::new(HashMap::new()),
            delivered: Mutex::new(HashMap::new()),
        })
    }

    /// Number of passwords buffered before an import flushes to disk.
    pub fn with_import_chunk(mut self, chunk: usize) -> Self {
        self.import_chunk = chunk.max(1);
        self
    }

    /// Every write is durable when it returns; closing only ends the session.
    pub fn close(self) {
        info!(path = %self.root.display(), "storage closed");
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn password_path(&self, key: ShardKey) -> PathBuf {
        self.root
            .join(PASSWORDS_DIR)
            .join(format!("{}.{}", key.to_hex(), PASSWORD_EXT))
    }

    fn essid_dir(&self, essid: &Essid) -> PathBuf {
        self.root.join(ESSIDS_DIR).join(essid.to_hex())
    }

    fn result_path(&self, essid: &Essid, key: ShardKey) -> PathBuf {
        self.essid_dir(essid)
            .join(format!("{}.{}", key.to_hex(), RESULT_EXT))
    }

    fn essid_lock(&self, essid: &Essid) -> Arc<RwLock<()>> {
        self.essid_locks
            .lock()
            .entry(essid.clone())
            .or_default()
            .clone()
    }

    fn result_lock(&self, essid: &Essid, key: ShardKey) -> Arc<Mutex<()>> {
        self.result_locks
            .lock()
            .entry((essid.clone(), key))
            .or_default()
            .clone()
    }

    // ESSIDs

    pub fn create_essid(&self, essid: &Essid) -> Result<(), StorageError> {
        let lock = self.essid_lock(essid);
        let _guard = lock.write();

        let dir = self.essid_dir(essid);
        match fs::create_dir(&dir) {
            Ok(()) => {
                info!(%essid, "ESSID created");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(ValidationError::EssidExists(essid.to_string()).into())
            }
            Err(e) => Err(StorageError::io(&dir, e)),
        }
    }

    /// Remove an ESSID and all of its result shards. Password shards are
    /// untouched. Returns the number of result shards removed.
    ///
    /// `confirm` only records whether the caller asked interactively; the
    /// deletion never waits for input.
    pub fn delete_essid(&self, essid: &Essid, confirm: bool) -> Result<usize, StorageError> {
        let lock = self.essid_lock(essid);
        let _guard = lock.write();

        let dir = self.essid_dir(essid);
        if !dir.is_dir() {
            return Err(ValidationError::EssidNotFound(essid.to_string()).into());
        }
        let removed = self.scan_result_keys(essid)?.len();
        fs::remove_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        self.delivered.lock().remove(essid);

        info!(%essid, removed, confirmed = confirm, "ESSID deleted");
        Ok(removed)
    }

    pub fn essid_exists(&self, essid: &Essid) -> bool {
        self.essid_dir(essid).is_dir()
    }

    fn require_essid(&self, essid: &Essid) -> Result<(), StorageError> {
        if self.essid_exists(essid) {
            Ok(())
        } else {
            Err(ValidationError::EssidNotFound(essid.to_string()).into())
        }
    }

    /// All ESSIDs with their result counts, read from shard headers only.
    pub fn list_essids(&self) -> Result<Vec<EssidInfo>, StorageError> {
        let dir = self.root.join(ESSIDS_DIR);
        let mut out = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StorageError::io(&dir, e))? {
            let entry = entry.map_err(|e| StorageError::io(&dir, e))?;
            let name = entry.file_name();
            let essid = match name.to_str().map(Essid::from_hex) {
                Some(Ok(essid)) => essid,
                _ => {
                    warn!(entry = ?name, "ignoring unknown entry in ESSID directory");
                    continue;
                }
            };

            let keys = self.scan_result_keys(&essid)?;
            let mut pmks = 0u64;
            for key in &keys {
                let path = self.result_path(&essid, *key);
                match read_prefix(&path, codec::RESULT_HEADER_MAX)
                    .and_then(|bytes| codec::decode_result_header(&bytes, &path))
                {
                    Ok(header) => pmks += header.count as u64,
                    Err(e) => warn!(error = %e, "skipping unreadable result shard"),
                }
            }
            out.push(EssidInfo {
                essid,
                result_shards: keys.len(),
                pmks,
            });
        }
        out.sort_by(|a, b| a.essid.cmp(&b.essid));
        Ok(out)
    }

    // Passwords

    /// Import newline-separated candidates.
    ///
    /// Lines are split on `\n` (a trailing `\r` is dropped); empty lines are
    /// ignored. Input is buffered in chunks and merged shard by shard, so the
    /// operation is idempotent and memory stays bounded.
    pub fn import_passwords<R: BufRead>(&self, mut reader: R) -> Result<ImportStats> {
        let mut stats = ImportStats::default();
        let mut pending: HashMap<ShardKey, Vec<Password>> = HashMap::new();
        let mut pending_len = 0usize;
        let mut buf = Vec::with_capacity(128);

        while let Some(line) = read_line(&mut reader, &mut buf)? {
            if line.is_empty() {
                continue;
            }
            match Password::new(line.to_vec()) {
                Ok(pw) => {
                    pending.entry(ShardKey::of(&pw)).or_default().push(pw);
                    pending_len += 1;
                }
                Err(_) => stats.rejected += 1,
            }
            if pending_len >= self.import_chunk {
                self.flush_import(&mut pending, &mut stats)?;
                pending_len = 0;
            }
        }
        self.flush_import(&mut pending, &mut stats)?;

        info!(
            accepted = stats.accepted,
            rejected = stats.rejected,
            duplicate = stats.duplicate,
            "import finished"
        );
        Ok(stats)
    }

    /// Import candidates from a password source. Validation already
    /// happened in the source, so nothing is counted as rejected here.
    pub fn import_source<I>(&self, source: I) -> Result<ImportStats>
    where
        I: IntoIterator<Item = io::Result<Password>>,
    {
        let mut stats = ImportStats::default();
        let mut pending: HashMap<ShardKey, Vec<Password>> = HashMap::new();
        let mut pending_len = 0usize;

        for pw in source {
            let pw = pw?;
            pending.entry(ShardKey::of(&pw)).or_default().push(pw);
            pending_len += 1;
            if pending_len >= self.import_chunk {
                self.flush_import(&mut pending, &mut stats)?;
                pending_len = 0;
            }
        }
        self.flush_import(&mut pending, &mut stats)?;

        info!(accepted = stats.accepted, duplicate = stats.duplicate, "import finished");
        Ok(stats)
    }

    pub fn import_file(&self, path: &Path) -> Result<ImportStats> {
        let file = File::open(path).map_err(|e| StorageError::io(path, e))?;
        self.import_passwords(BufReader::with_capacity(1 << 20, file))
    }

    fn flush_import(
        &self,
        pending: &mut HashMap<ShardKey, Vec<Password>>,
        stats: &mut ImportStats,
    ) -> Result<(), StorageError> {
        let mut keys: Vec<ShardKey> = pending.keys().copied().collect();
        keys.sort_unstable();
        for key in keys {
            if let Some(batch) = pending.remove(&key) {
                let (added, duplicate) = self.merge_password_shard(key, batch)?;
                stats.accepted += added;
                stats.duplicate += duplicate;
            }
        }
        Ok(())
    }

    /// Add `batch` to the shard, returning (added, duplicate) counts.
    fn merge_password_shard(
        &self,
        key: ShardKey,
        mut batch: Vec<Password>,
    ) -> Result<(u64, u64), StorageError> {
        let _guard = self.password_locks[key.index()].lock();

        let incoming = batch.len() as u64;
        batch.sort_unstable();
        batch.dedup();

        let existing = self
            .load_password_shard(key)?
            .map(PasswordShard::into_passwords)
            .unwrap_or_default();
        batch.retain(|pw| existing.binary_search(pw).is_err());

        let added = batch.len() as u64;
        if added > 0 {
            let mut merged = existing;
            merged.extend(batch);
            let shard = PasswordShard::new(key, merged);
            let path = self.password_path(key);
            let dir = self.root.join(PASSWORDS_DIR);
            write_atomic(&dir, &path, &codec::encode_password_shard(&shard))?;
            debug!(shard = %key, added, total = shard.len(), "password shard updated");
        }
        Ok((added, incoming - added))
    }

    /// Load one password shard; `None` when no password maps to it yet.
    pub fn load_password_shard(&self, key: ShardKey) -> Result<Option<PasswordShard>, StorageError> {
        let path = self.password_path(key);
        let Some(bytes) = read_optional(&path)? else {
            return Ok(None);
        };
        let shard = codec::decode_password_shard(&bytes, &path)?;
        if shard.key != key {
            return Err(StorageError::corrupt(&path, "shard key mismatch"));
        }
        Ok(Some(shard))
    }

    /// Keys of all stored password shards, ascending.
    pub fn password_shard_keys(&self) -> Result<Vec<ShardKey>, StorageError> {
        scan_keys(&self.root.join(PASSWORDS_DIR), PASSWORD_EXT)
    }

    /// Number of stored passwords, read from shard headers.
    pub fn password_count(&self) -> Result<u64, StorageError> {
        let mut total = 0u64;
        for key in self.password_shard_keys()? {
            let path = self.password_path(key);
            match read_prefix(&path, codec::PASSWORD_HEADER_LEN)
                .and_then(|bytes| codec::password_shard_count(&bytes, &path))
            {
                Ok(count) => total += count as u64,
                Err(e) => warn!(error = %e, "skipping unreadable password shard"),
            }
        }
        Ok(total)
    }

    /// Lazy iteration over password shards in key order. Unreadable shards
    /// are skipped with a warning. Call again to restart.
    pub fn iter_password_shards(&self) -> PasswordShards<'_> {
        PasswordShards {
            storage: self,
            keys: ShardKey::all().collect::<Vec<_>>().into_iter(),
        }
    }

    /// Write every stored password, one per line. Returns the count.
    pub fn export_passwords<W: Write>(&self, mut writer: W) -> Result<u64> {
        let mut count = 0u64;
        for shard in self.iter_password_shards() {
            for pw in shard.passwords() {
                writer.write_all(pw.as_bytes())?;
                writer.write_all(b"\n")?;
                count += 1;
            }
        }
        writer.flush()?;
        info!(count, "passwords exported");
        Ok(count)
    }

    // Results

    fn scan_result_keys(&self, essid: &Essid) -> Result<Vec<ShardKey>, StorageError> {
        scan_keys(&self.essid_dir(essid), RESULT_EXT)
    }

    /// Keys of the result shards stored for `essid`, ascending.
    pub fn result_shard_keys(&self, essid: &Essid) -> Result<Vec<ShardKey>, StorageError> {
        self.require_essid(essid)?;
        self.scan_result_keys(essid)
    }

    fn load_result_bytes(
        &self,
        essid: &Essid,
        key: ShardKey,
    ) -> Result<Option<(ResultShard, [u8; 16])>, StorageError> {
        let path = self.result_path(essid, key);
        let Some(bytes) = read_optional(&path)? else {
            return Ok(None);
        };
        let shard = codec::decode_result_shard(&bytes, &path)?;
        if &shard.essid != essid || shard.key != key {
            return Err(StorageError::corrupt(&path, "header does not match location"));
        }
        let revision = codec::revision(&bytes)
            .ok_or_else(|| StorageError::corrupt(&path, "file too short"))?;
        Ok(Some((shard, revision)))
    }

    pub fn load_result_shard(
        &self,
        essid: &Essid,
        key: ShardKey,
    ) -> Result<Option<ResultShard>, StorageError> {
        self.require_essid(essid)?;
        Ok(self.load_result_bytes(essid, key)?.map(|(shard, _)| shard))
    }

    /// Header of one result shard, read without decoding its entries.
    pub fn result_header(&self, essid: &Essid, key: ShardKey) -> Result<Option<ResultHeader>, StorageError> {
        self.require_essid(essid)?;
        let path = self.result_path(essid, key);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = read_prefix(&path, codec::RESULT_HEADER_MAX)?;
        codec::decode_result_header(&bytes, &path).map(Some)
    }

    /// Atomically replace the result shard `(shard.essid, shard.key)`.
    pub fn write_result_shard(&self, shard: &ResultShard) -> Result<(), StorageError> {
        let lock = self.essid_lock(&shard.essid);
        let _essid_guard = lock.read();
        self.require_essid(&shard.essid)?;

        let shard_lock = self.result_lock(&shard.essid, shard.key);
        let _shard_guard = shard_lock.lock();

        let dir = self.essid_dir(&shard.essid);
        let path = self.result_path(&shard.essid, shard.key);
        write_atomic(&dir, &path, &codec::encode_result_shard(shard))?;
        debug!(essid = %shard.essid, shard = %shard.key, pmks = shard.len(), "result shard written");
        Ok(())
    }

    /// Lazy iteration over the result shards of `essid`.
    ///
    /// With `new_only`, a shard is yielded only if this session has not
    /// yielded the same revision of it before.
    pub fn iter_results(&self, essid: &Essid, new_only: bool) -> Result<ResultShards<'_>, StorageError> {
        let keys = self.result_shard_keys(essid)?;
        Ok(ResultShards {
            storage: self,
            essid: essid.clone(),
            keys: keys.into_iter(),
            new_only,
        })
    }

    pub fn stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            password_shards: self.password_shard_keys()?.len(),
            passwords: self.password_count()?,
            essids: self.list_essids()?,
        })
    }
}

pub struct PasswordShards<'a> {
    storage: &'a StorageEngine,
    keys: std::vec::IntoIter<ShardKey>,
}

impl Iterator for PasswordShards<'_> {
    type Item = PasswordShard;

    fn next(&mut self) -> Option<PasswordShard> {
        for key in self.keys.by_ref() {
            match self.storage.load_password_shard(key) {
                Ok(Some(shard)) => return Some(shard),
                Ok(None) => continue,
                Err(e) => warn!(shard = %key, error = %e, "skipping password shard"),
            }
        }
        None
    }
}

pub struct ResultShards<'a> {
    storage: &'a StorageEngine,
    essid: Essid,
    keys: std::vec::IntoIter<ShardKey>,
    new_only: bool,
}

impl Iterator for ResultShards<'_> {
    type Item = ResultShard;

    fn next(&mut self) -> Option<ResultShard> {
        for key in self.keys.by_ref() {
            let (shard, revision) = match self.storage.load_result_bytes(&self.essid, key) {
                Ok(Some(loaded)) => loaded,
                Ok(None) => continue,
                Err(e) => {
                    warn!(essid = %self.essid, shard = %key, error = %e, "skipping result shard");
                    continue;
                }
            };
            if self.new_only {
                let mut delivered = self.storage.delivered.lock();
                let seen = delivered.entry(self.essid.clone()).or_default();
                if seen.get(&key) == Some(&revision) {
                    continue;
                }
                seen.insert(key, revision);
            }
            return Some(shard);
        }
        None
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

fn read_prefix(path: &Path, len: usize) -> Result<Vec<u8>, StorageError> {
    let file = File::open(path).map_err(|e| StorageError::io(path, e))?;
    let mut buf = Vec::with_capacity(len);
    file.take(len as u64)
        .read_to_end(&mut buf)
        .map_err(|e| StorageError::io(path, e))?;
    Ok(buf)
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| StorageError::io(dir, e))?;
    temp.write_all(bytes).map_err(|e| StorageError::io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| StorageError::io(path, e.error))?;
    Ok(())
}

/// Shard keys of the `<kk>.<ext>` files in `dir`, ascending. A missing
/// directory has no keys.
fn scan_keys(dir: &Path, ext: &str) -> Result<Vec<ShardKey>, StorageError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(dir, e)),
    };
    let mut keys = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io(dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ext) {
            continue;
        }
        if let Some(key) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(ShardKey::from_hex)
        {
            keys.push(key);
        }
    }
    keys.sort_unstable();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::Fingerprint;
    use std::io::Cursor;

    fn essid(s: &str) -> Essid {
        s.parse().unwrap()
    }

    fn import(storage: &StorageEngine, lines: &[&str]) -> ImportStats {
        let data = lines.join("\n");
        storage.import_passwords(Cursor::new(data.into_bytes())).unwrap()
    }

    fn fake_results(shard: &PasswordShard, essid: &Essid) -> ResultShard {
        let entries = shard
            .passwords()
            .iter()
            .map(|pw| (pw.clone(), [pw.as_bytes()[0]; 32]))
            .collect();
        ResultShard::new(essid.clone(), shard.key, shard.fingerprint(), entries)
    }

    #[test]
    fn test_open_writes_format_marker() {
        let dir = tempfile::tempdir().unwrap();
        StorageEngine::open(dir.path()).unwrap().close();
        let marker = fs::read_to_string(dir.path().join(FORMAT_FILE)).unwrap();
        assert!(marker.contains("\"version\":1"));

        // reopening is fine
        StorageEngine::open(dir.path()).unwrap();
    }

    #[test]
    fn test_open_rejects_other_format() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(FORMAT_FILE), br#"{"version": 9}"#).unwrap();
        let err = StorageEngine::open(dir.path()).err().unwrap();
        assert!(matches!(err, StorageError::Format { found: 9, .. }));
    }

    #[test]
    fn test_essid_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageEngine::open(dir.path()).unwrap();
        let net = essid("linksys");

        storage.create_essid(&net).unwrap();
        assert!(storage.essid_exists(&net));
        assert!(matches!(
            storage.create_essid(&net),
            Err(StorageError::Validation(ValidationError::EssidExists(_)))
        ));

        // no confirmation needed to proceed
        storage.delete_essid(&net, false).unwrap();
        assert!(!storage.essid_exists(&net));
        assert!(matches!(
            storage.delete_essid(&net, true),
            Err(StorageError::Validation(ValidationError::EssidNotFound(_)))
        ));

        // recreated without residual results
        storage.create_essid(&net).unwrap();
        assert!(storage.result_shard_keys(&net).unwrap().is_empty());
    }

    #[test]
    fn test_import_counts() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageEngine::open(dir.path()).unwrap().with_import_chunk(2);

        let stats = import(
            &storage,
            &["dictionary", "short", "dictionary", "password1", "", "password2"],
        );
        assert_eq!(
            stats,
            ImportStats {
                accepted: 3,
                rejected: 1,
                duplicate: 1
            }
        );

        let again = import(&storage, &["dictionary", "password1"]);
        assert_eq!(again.accepted, 0);
        assert_eq!(again.duplicate, 2);
        assert_eq!(storage.password_count().unwrap(), 3);
    }

    #[test]
    fn test_password_shards_are_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageEngine::open(dir.path()).unwrap();
        let lines: Vec<String> = (0..300).map(|i| format!("test123{}", i)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        import(&storage, &refs);

        let keys: Vec<ShardKey> = storage.iter_password_shards().map(|s| s.key).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(keys, storage.password_shard_keys().unwrap());

        let total: usize = storage.iter_password_shards().map(|s| s.len()).sum();
        assert_eq!(total, 300);
    }

    #[test]
    fn test_export_passwords() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageEngine::open(dir.path()).unwrap();
        import(&storage, &["dictionary", "password1", "password2"]);

        let mut out = Vec::new();
        assert_eq!(storage.export_passwords(&mut out).unwrap(), 3);
        let mut lines: Vec<&[u8]> = out.split(|&b| b == b'\n').filter(|l| !l.is_empty()).collect();
        lines.sort();
        assert_eq!(lines, vec![&b"dictionary"[..], b"password1", b"password2"]);
    }

    #[test]
    fn test_result_write_and_iterate() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageEngine::open(dir.path()).unwrap();
        let net = essid("linksys");
        storage.create_essid(&net).unwrap();
        import(&storage, &["dictionary", "password1", "password2", "password3"]);

        for shard in storage.iter_password_shards() {
            storage.write_result_shard(&fake_results(&shard, &net)).unwrap();
        }
        assert_eq!(
            storage.result_shard_keys(&net).unwrap(),
            storage.password_shard_keys().unwrap()
        );

        let info = storage.list_essids().unwrap();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].pmks, 4);

        let all: usize = storage.iter_results(&net, false).unwrap().map(|s| s.len()).sum();
        assert_eq!(all, 4);
    }

    #[test]
    fn test_write_result_requires_essid() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageEngine::open(dir.path()).unwrap();
        let shard = ResultShard::new(
            essid("ghost"),
            ShardKey::from_index(0),
            Fingerprint::default(),
            Vec::new(),
        );
        assert!(storage.write_result_shard(&shard).is_err());
        assert!(storage.iter_results(&essid("ghost"), false).is_err());
    }

    #[test]
    fn test_new_only_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageEngine::open(dir.path()).unwrap();
        let net = essid("linksys");
        storage.create_essid(&net).unwrap();
        import(&storage, &["dictionary", "password1"]);
        for shard in storage.iter_password_shards() {
            storage.write_result_shard(&fake_results(&shard, &net)).unwrap();
        }

        let first = storage.iter_results(&net, true).unwrap().count();
        assert_eq!(first, storage.password_shard_keys().unwrap().len());
        assert_eq!(storage.iter_results(&net, true).unwrap().count(), 0);
        // the plain iteration ignores the cursor
        assert_eq!(storage.iter_results(&net, false).unwrap().count(), first);

        // a rewritten shard is new again
        import(&storage, &["password2"]);
        let key = ShardKey::of(&"password2".parse().unwrap());
        let shard = storage.load_password_shard(key).unwrap().unwrap();
        storage.write_result_shard(&fake_results(&shard, &net)).unwrap();
        let again: Vec<ShardKey> = storage.iter_results(&net, true).unwrap().map(|s| s.key).collect();
        assert_eq!(again, vec![key]);
    }

    #[test]
    fn test_corrupt_shards_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageEngine::open(dir.path()).unwrap();
        let net = essid("linksys");
        storage.create_essid(&net).unwrap();
        import(&storage, &["dictionary"]);

        let key = ShardKey::of(&"dictionary".parse().unwrap());
        let shard = storage.load_password_shard(key).unwrap().unwrap();
        storage.write_result_shard(&fake_results(&shard, &net)).unwrap();

        let path = storage.result_path(&net, key);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 20;
        bytes[last] ^= 0x55;
        fs::write(&path, bytes).unwrap();

        assert!(storage.load_result_shard(&net, key).unwrap_err().is_corrupt());
        assert_eq!(storage.iter_results(&net, false).unwrap().count(), 0);
    }

    #[test]
    fn test_import_into_corrupt_shard_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageEngine::open(dir.path()).unwrap();
        import(&storage, &["dictionary"]);

        let key = ShardKey::of(&"dictionary".parse().unwrap());
        fs::write(storage.password_path(key), b"garbage").unwrap();

        let err = storage
            .import_passwords(Cursor::new(b"dictionary\n".to_vec()))
            .unwrap_err();
        assert!(matches!(err, crate::Error::Storage(ref e) if e.is_corrupt()));
        assert_eq!(storage.iter_password_shards().count(), 0);
    }
}
