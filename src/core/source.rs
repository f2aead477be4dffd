/*!
 * Password candidate sources
 *
 * A source is a lazy stream of validated candidates:
 * - wordlists read as raw byte lines (no UTF-8 requirement)
 * - numeric ranges generated on the fly
 * - in-memory lists
 *
 * Candidates outside the 8..=63 byte range are skipped and counted, never
 * yielded.
 */

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use tracing::debug;

use crate::error::ValidationError;
use crate::model::{Password, MIN_PASSWORD_LEN};

/// Boxed candidate stream accepted by the attack engine.
pub type PasswordSource = Box<dyn Iterator<Item = io::Result<Password>> + Send>;

/// Read one line into `buf`, returning it without its `\n` / `\r\n`
/// terminator. Other whitespace is part of the candidate.
pub(crate) fn read_line<'a, R: BufRead>(
    reader: &mut R,
    buf: &'a mut Vec<u8>,
) -> io::Result<Option<&'a [u8]>> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Ok(None);
    }
    let mut line = &buf[..];
    if let Some(rest) = line.strip_suffix(b"\n") {
        line = rest;
        if let Some(rest) = line.strip_suffix(b"\r") {
            line = rest;
        }
    }
    Ok(Some(line))
}

/// Streams candidates line by line from any buffered reader.
pub struct WordlistReader<R> {
    reader: R,
    buf: Vec<u8>,
    rejected: u64,
    done: bool,
}

impl WordlistReader<BufReader<File>> {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::with_capacity(1 << 20, file)))
    }
}

impl<R: BufRead> WordlistReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(128),
            rejected: 0,
            done: false,
        }
    }

    /// Lines skipped because of their length so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

impl<R: BufRead> Iterator for WordlistReader<R> {
    type Item = io::Result<Password>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let line = match read_line(&mut self.reader, &mut self.buf) {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.done = true;
                    debug!(rejected = self.rejected, "wordlist exhausted");
                    break;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            if line.is_empty() {
                continue;
            }
            match Password::new(line.to_vec()) {
                Ok(pw) => return Some(Ok(pw)),
                Err(_) => self.rejected += 1,
            }
        }
        None
    }
}

/// Largest digit count whose range still fits in a u64.
pub const MAX_NUMERIC_DIGITS: usize = 19;

/// All-digit candidates, every length in `min_len..=max_len`, ascending.
#[derive(Debug, Clone)]
pub struct NumericRange {
    length: usize,
    max_len: usize,
    index: u64,
    combinations: u64,
}

impl NumericRange {
    pub fn new(min_len: usize, max_len: usize) -> Result<Self, ValidationError> {
        if min_len < MIN_PASSWORD_LEN || min_len > max_len {
            return Err(ValidationError::PasswordLength(min_len));
        }
        if max_len > MAX_NUMERIC_DIGITS {
            return Err(ValidationError::PasswordLength(max_len));
        }
        Ok(Self {
            length: min_len,
            max_len,
            index: 0,
            combinations: 10u64.pow(min_len as u32),
        })
    }

    /// Total number of candidates over all lengths.
    pub fn total_combinations(min_len: usize, max_len: usize) -> u64 {
        (min_len..=max_len.min(MAX_NUMERIC_DIGITS))
            .map(|len| 10u64.pow(len as u32))
            .fold(0u64, u64::saturating_add)
    }

    /// Candidate at index with branchless digit conversion.
    #[inline(always)]
    pub fn generate_at_index(length: usize, mut index: u64) -> Vec<u8> {
        let mut buffer = [b'0'; 20];
        let start_idx = 20 - length;

        for i in (start_idx..20).rev() {
            buffer[i] = b'0' + (index % 10) as u8;
            index /= 10;
        }
        buffer[start_idx..].to_vec()
    }
}

impl Iterator for NumericRange {
    type Item = io::Result<Password>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.combinations {
            if self.length >= self.max_len {
                return None;
            }
            self.length += 1;
            self.index = 0;
            self.combinations = 10u64.pow(self.length as u32);
        }
        let bytes = Self::generate_at_index(self.length, self.index);
        self.index += 1;
        Some(
            Password::new(bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        )
    }

    fn nth(&mut self, mut n: usize) -> Option<Self::Item> {
        loop {
            let remaining = self.combinations - self.index;
            if (n as u64) < remaining {
                self.index += n as u64;
                return self.next();
            }
            if self.length >= self.max_len {
                self.index = self.combinations;
                return None;
            }
            n -= remaining as usize;
            self.length += 1;
            self.index = 0;
            self.combinations = 10u64.pow(self.length as u32);
        }
    }
}

pub fn wordlist(path: &Path) -> io::Result<PasswordSource> {
    Ok(Box::new(WordlistReader::open(path)?))
}

pub fn numeric(min_len: usize, max_len: usize) -> Result<PasswordSource, ValidationError> {
    Ok(Box::new(NumericRange::new(min_len, max_len)?))
}

pub fn memory(passwords: Vec<Password>) -> PasswordSource {
    Box::new(passwords.into_iter().map(Ok))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_line_terminators() {
        let mut reader = Cursor::new(b"one\ntwo\r\n three \nlast".to_vec());
        let mut buf = Vec::new();
        let mut lines = Vec::new();
        while let Some(line) = read_line(&mut reader, &mut buf).unwrap() {
            lines.push(line.to_vec());
        }
        assert_eq!(
            lines,
            vec![
                b"one".to_vec(),
                b"two".to_vec(),
                b" three ".to_vec(),
                b"last".to_vec()
            ]
        );
    }

    #[test]
    fn test_wordlist_skips_invalid() {
        let data = b"short\nvalidpass\n\n\xff\xfe\xfd\xfc\xfb\xfa\xf9\xf8\n".to_vec();
        let mut reader = WordlistReader::new(Cursor::new(data));
        let out: Vec<Password> = reader.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_bytes(), b"validpass");
        assert_eq!(out[1].len(), 8);
        assert_eq!(reader.rejected(), 1);
    }

    #[test]
    fn test_numeric_generator() {
        assert_eq!(NumericRange::generate_at_index(8, 0), b"00000000");
        assert_eq!(NumericRange::generate_at_index(8, 1234), b"00001234");
        assert_eq!(NumericRange::generate_at_index(8, 99_999_999), b"99999999");
    }

    #[test]
    fn test_numeric_range_spans_lengths() {
        let mut range = NumericRange::new(8, 9).unwrap();
        let first = range.next().unwrap().unwrap();
        assert_eq!(first.as_bytes(), b"00000000");

        let mut range = NumericRange::new(8, 9).unwrap();
        let ninth = range.nth(100_000_000).unwrap().unwrap();
        assert_eq!(ninth.as_bytes(), b"000000000");
        assert_eq!(NumericRange::total_combinations(8, 9), 1_100_000_000);
    }

    #[test]
    fn test_numeric_range_bounds() {
        assert!(NumericRange::new(7, 8).is_err());
        assert!(NumericRange::new(9, 8).is_err());
        assert!(NumericRange::new(8, 20).is_err());
    }
}
