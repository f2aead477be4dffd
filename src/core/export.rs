/*!
 * Export adapters
 *
 * Formats consumed by third-party tools:
 * - cowpatty: `genpmk` style binary file keyed by one ESSID
 * - airolib-ng: SQLite database of ESSIDs, passwords and PMKs
 *
 * The line-oriented password list lives on `StorageEngine::export_passwords`.
 */

use std::io::{self, Read, Write};
use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::info;

use crate::error::{Result, ValidationError};
use crate::model::{Essid, Password, Pmk, MAX_ESSID_LEN};
use crate::storage::StorageEngine;

/// "APWC" read as a little-endian u32
const COWPATTY_MAGIC: u32 = 0x4357_5041;
const COWPATTY_HEADER_LEN: usize = 40;

/// Writes a cowpatty hash file for one ESSID.
pub struct CowpattyWriter<W: Write> {
    out: W,
    written: u64,
}

impl<W: Write> CowpattyWriter<W> {
    pub fn new(mut out: W, essid: &Essid) -> io::Result<Self> {
        let mut header = [0u8; COWPATTY_HEADER_LEN];
        header[0..4].copy_from_slice(&COWPATTY_MAGIC.to_le_bytes());
        let name = essid.as_bytes();
        header[7] = name.len() as u8;
        header[8..8 + name.len()].copy_from_slice(name);
        out.write_all(&header)?;
        Ok(Self { out, written: 0 })
    }

    pub fn write(&mut self, password: &Password, pmk: &Pmk) -> io::Result<()> {
        let word = password.as_bytes();
        self.out.write_all(&[(1 + word.len() + pmk.len()) as u8])?;
        self.out.write_all(word)?;
        self.out.write_all(pmk)?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Reads a cowpatty hash file back as (password, PMK) records.
pub struct CowpattyReader<R: Read> {
    input: R,
    essid: Essid,
    failed: bool,
}

impl<R: Read> CowpattyReader<R> {
    pub fn new(mut input: R) -> io::Result<Self> {
        let mut header = [0u8; COWPATTY_HEADER_LEN];
        input.read_exact(&mut header)?;
        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != COWPATTY_MAGIC {
            return Err(invalid("not a cowpatty hash file"));
        }
        let len = header[7] as usize;
        if len > MAX_ESSID_LEN {
            return Err(invalid("ESSID length out of range"));
        }
        let essid = Essid::new(header[8..8 + len].to_vec()).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            input,
            essid,
            failed: false,
        })
    }

    pub fn essid(&self) -> &Essid {
        &self.essid
    }

    fn read_record(&mut self) -> io::Result<Option<(Password, Pmk)>> {
        let mut size = [0u8; 1];
        match self.input.read_exact(&mut size) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let size = size[0] as usize;
        if size < 1 + 32 {
            return Err(invalid("record shorter than a PMK"));
        }
        let mut body = vec![0u8; size - 1];
        self.input.read_exact(&mut body)?;
        let split = body.len() - 32;
        let mut pmk = [0u8; 32];
        pmk.copy_from_slice(&body[split..]);
        body.truncate(split);
        let password = Password::new(body).map_err(|e| invalid(&e.to_string()))?;
        Ok(Some((password, pmk)))
    }
}

impl<R: Read> Iterator for CowpattyReader<R> {
    type Item = io::Result<(Password, Pmk)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Write every stored PMK of `essid` as a cowpatty file, sorted by password.
pub fn export_cowpatty<W: Write>(storage: &StorageEngine, essid: &Essid, out: W) -> Result<u64> {
    if !storage.essid_exists(essid) {
        return Err(ValidationError::EssidNotFound(essid.to_string()).into());
    }
    let mut entries: Vec<(Password, Pmk)> = storage
        .iter_results(essid, false)?
        .flat_map(|shard| shard.into_entries())
        .collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

    let mut writer = CowpattyWriter::new(out, essid)?;
    for (password, pmk) in &entries {
        writer.write(password, pmk)?;
    }
    let written = writer.written();
    writer.finish()?;
    info!(%essid, records = written, "cowpatty export finished");
    Ok(written)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HashdbStats {
    pub essids: u64,
    pub passwords: u64,
    pub pmks: u64,
}

fn initialize_hashdb(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS essid (
           essid_id INTEGER PRIMARY KEY AUTOINCREMENT,
           essid TEXT,
           prio INTEGER DEFAULT 64
         );
         CREATE TABLE IF NOT EXISTS passwd (
           passwd_id INTEGER PRIMARY KEY AUTOINCREMENT,
           passwd TEXT
         );
         CREATE TABLE IF NOT EXISTS pmk (
           pmk_id INTEGER PRIMARY KEY AUTOINCREMENT,
           passwd_id INT,
           essid_id INT,
           pmk BLOB
         );
         CREATE UNIQUE INDEX IF NOT EXISTS essid_u ON essid (essid);
         CREATE UNIQUE INDEX IF NOT EXISTS passwd_u ON passwd (passwd);
         CREATE UNIQUE INDEX IF NOT EXISTS ep_u ON pmk (essid_id, passwd_id);",
    )
}

/// Text when the bytes are UTF-8, a blob otherwise.
fn sql_text(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(s) => Value::Text(s.to_string()),
        Err(_) => Value::Blob(bytes.to_vec()),
    }
}

/// Export stored results into an airolib-ng compatible SQLite database.
///
/// Existing databases are extended; rows already present are kept.
pub fn export_hashdb(storage: &StorageEngine, path: &Path, essid: Option<&Essid>) -> Result<HashdbStats> {
    let essids = match essid {
        Some(essid) => {
            if !storage.essid_exists(essid) {
                return Err(ValidationError::EssidNotFound(essid.to_string()).into());
            }
            vec![essid.clone()]
        }
        None => storage.list_essids()?.into_iter().map(|info| info.essid).collect(),
    };

    let mut conn = Connection::open(path)?;
    initialize_hashdb(&conn)?;
    let tx = conn.transaction()?;
    let mut stats = HashdbStats::default();
    {
        let mut insert_essid = tx.prepare("INSERT OR IGNORE INTO essid (essid) VALUES (?1)")?;
        let mut select_essid = tx.prepare("SELECT essid_id FROM essid WHERE essid = ?1")?;
        let mut insert_passwd = tx.prepare("INSERT OR IGNORE INTO passwd (passwd) VALUES (?1)")?;
        let mut select_passwd = tx.prepare("SELECT passwd_id FROM passwd WHERE passwd = ?1")?;
        let mut insert_pmk =
            tx.prepare("INSERT OR REPLACE INTO pmk (essid_id, passwd_id, pmk) VALUES (?1, ?2, ?3)")?;

        for essid in &essids {
            let name = sql_text(essid.as_bytes());
            insert_essid.execute(params![name])?;
            let essid_id: i64 = select_essid.query_row(params![name], |row| row.get(0))?;
            stats.essids += 1;

            for shard in storage.iter_results(essid, false)? {
                for (password, pmk) in shard.entries() {
                    let word = sql_text(password.as_bytes());
                    stats.passwords += insert_passwd.execute(params![word])? as u64;
                    let passwd_id: Option<i64> = select_passwd
                        .query_row(params![word], |row| row.get(0))
                        .optional()?;
                    if let Some(passwd_id) = passwd_id {
                        insert_pmk.execute(params![essid_id, passwd_id, &pmk[..]])?;
                        stats.pmks += 1;
                    }
                }
            }
        }
    }
    tx.commit()?;
    info!(
        path = %path.display(),
        essids = stats.essids,
        passwords = stats.passwords,
        pmks = stats.pmks,
        "hash database export finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pw(s: &str) -> Password {
        s.parse().unwrap()
    }

    #[test]
    fn test_cowpatty_layout() {
        let essid: Essid = "linksys".parse().unwrap();
        let mut w = CowpattyWriter::new(Vec::new(), &essid).unwrap();
        w.write(&pw("password"), &[7u8; 32]).unwrap();
        let bytes = w.finish().unwrap();

        assert_eq!(&bytes[0..4], b"APWC");
        assert_eq!(bytes[7], 7);
        assert_eq!(&bytes[8..15], b"linksys");
        assert_eq!(bytes.len(), 40 + 1 + 8 + 32);
        assert_eq!(bytes[40], 41);
    }

    #[test]
    fn test_cowpatty_reader() {
        let essid: Essid = "linksys".parse().unwrap();
        let mut w = CowpattyWriter::new(Vec::new(), &essid).unwrap();
        w.write(&pw("password"), &[1u8; 32]).unwrap();
        w.write(&pw("dictionary"), &[2u8; 32]).unwrap();
        let bytes = w.finish().unwrap();

        let reader = CowpattyReader::new(&bytes[..]).unwrap();
        assert_eq!(reader.essid(), &essid);
        let records: Vec<_> = reader.collect::<io::Result<_>>().unwrap();
        assert_eq!(records, vec![(pw("password"), [1u8; 32]), (pw("dictionary"), [2u8; 32])]);
    }

    #[test]
    fn test_cowpatty_reader_rejects() {
        assert!(CowpattyReader::new(&[0u8; 40][..]).is_err());

        let essid: Essid = "linksys".parse().unwrap();
        let mut bytes = CowpattyWriter::new(Vec::new(), &essid).unwrap().finish().unwrap();
        bytes.extend_from_slice(&[50, b'a', b'b']);
        let mut reader = CowpattyReader::new(&bytes[..]).unwrap();
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_export_hashdb() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageEngine::open(dir.path().join("store")).unwrap();
        storage.import_passwords(&b"password\ndictionary\n"[..]).unwrap();
        let essid: Essid = "linksys".parse().unwrap();
        storage.create_essid(&essid).unwrap();
        for shard in storage.iter_password_shards() {
            let source = shard.fingerprint();
            let key = shard.key;
            let entries = shard.into_passwords().into_iter().map(|p| (p, [9u8; 32])).collect();
            storage
                .write_result_shard(&crate::storage::ResultShard::new(essid.clone(), key, source, entries))
                .unwrap();
        }

        let db = dir.path().join("hash.db");
        let stats = export_hashdb(&storage, &db, None).unwrap();
        assert_eq!(stats, HashdbStats { essids: 1, passwords: 2, pmks: 2 });

        // a second export keeps the rows unique
        export_hashdb(&storage, &db, Some(&essid)).unwrap();
        let conn = Connection::open(&db).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM pmk", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
        let name: String = conn.query_row("SELECT essid FROM essid", [], |r| r.get(0)).unwrap();
        assert_eq!(name, "linksys");
    }
}
