//! `/proc/<pid>/mountinfo` reader.
//!
//! Line format (see proc(5)):
//!
//! ```text
//! 36 35 98:0 /mnt1 /mnt/parent rw,noatime master:1 - ext3 /dev/root rw,errors=continue
//! (1)(2)(3)   (4)   (5)         (6)        (7)    (8) (9)   (10)      (11)
//! ```
//!
//! A bind mount of a subtree reports the subtree in field 4. To give bind
//! mounts a usable source, that root is joined onto the mount point of the
//! same filesystem (same `major:minor`) whose root is `/`.

use std::collections::{BTreeSet, HashMap};
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use blockattach_common::paths::DEFAULT_MOUNTINFO;
use blockattach_common::{AttachError, AttachResult};
use thiserror::Error;

use super::{MountRecord, MountTable};

/// Malformed mountinfo content.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MountInfoError {
    /// A line has fewer fields than the format requires.
    #[error("line {line}: expected at least 10 fields")]
    TooFewFields {
        /// 1-based line number.
        line: usize,
    },

    /// The optional-field list is not terminated by `-`.
    #[error("line {line}: missing optional field separator")]
    MissingSeparator {
        /// 1-based line number.
        line: usize,
    },
}

/// Mount table backed by a mountinfo file.
#[derive(Debug, Clone)]
pub struct ProcMountTable {
    path: PathBuf,
}

impl ProcMountTable {
    /// Read mounts from `path` (normally `/proc/self/mountinfo`).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcMountTable {
    fn default() -> Self {
        Self::new(DEFAULT_MOUNTINFO)
    }
}

impl MountTable for ProcMountTable {
    fn mounts(&self) -> AttachResult<Vec<MountRecord>> {
        // Mount points are arbitrary bytes; only whitespace and backslash
        // are escaped by the kernel.
        let content = std::fs::read(&self.path).map_err(|e| AttachError::MountTable {
            message: format!("reading {}: {e}", self.path.display()),
        })?;
        let records = parse_mountinfo(&content).map_err(|e| AttachError::MountTable {
            message: e.to_string(),
        })?;
        tracing::trace!(count = records.len(), "Read mount table");
        Ok(records)
    }
}

struct RawEntry {
    major_minor: String,
    root: PathBuf,
    record: MountRecord,
}

/// Parse mountinfo content into records.
///
/// # Errors
///
/// Returns an error on the first malformed non-empty line.
pub fn parse_mountinfo(content: impl AsRef<[u8]>) -> Result<Vec<MountRecord>, MountInfoError> {
    let mut entries = Vec::new();
    for (idx, line) in content.as_ref().split(|&b| b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        entries.push(parse_line(idx + 1, line)?);
    }

    let fs_roots: HashMap<&str, &Path> = entries
        .iter()
        .filter(|e| e.root == Path::new("/"))
        .map(|e| (e.major_minor.as_str(), e.record.path.as_path()))
        .collect();

    let sources: Vec<PathBuf> = entries
        .iter()
        .map(|e| {
            if e.root == Path::new("/") {
                return PathBuf::from(&e.record.device);
            }
            match fs_roots.get(e.major_minor.as_str()) {
                Some(base) => base.join(e.root.strip_prefix("/").unwrap_or(&e.root)),
                None => PathBuf::from(&e.record.device),
            }
        })
        .collect();

    Ok(entries
        .into_iter()
        .zip(sources)
        .map(|(mut e, source)| {
            e.record.source = source;
            e.record
        })
        .collect())
}

fn parse_line(line_no: usize, line: &[u8]) -> Result<RawEntry, MountInfoError> {
    let fields: Vec<&[u8]> = line
        .split(u8::is_ascii_whitespace)
        .filter(|f| !f.is_empty())
        .collect();
    if fields.len() < 10 {
        return Err(MountInfoError::TooFewFields { line: line_no });
    }

    let sep = fields[6..]
        .iter()
        .position(|f| *f == b"-".as_slice())
        .map(|p| p + 6)
        .ok_or(MountInfoError::MissingSeparator { line: line_no })?;
    if fields.len() < sep + 3 {
        return Err(MountInfoError::TooFewFields { line: line_no });
    }

    let options: BTreeSet<String> = text(fields[5]).split(',').map(str::to_string).collect();

    Ok(RawEntry {
        major_minor: text(fields[2]),
        root: path(fields[3]),
        record: MountRecord {
            path: path(fields[4]),
            source: PathBuf::new(),
            device: text(&unescape(fields[sep + 2])),
            fs_type: text(fields[sep + 1]),
            options,
        },
    })
}

fn text(field: &[u8]) -> String {
    String::from_utf8_lossy(field).into_owned()
}

fn path(field: &[u8]) -> PathBuf {
    PathBuf::from(OsStr::from_bytes(&unescape(field)))
}

/// Decode the kernel's `\ooo` octal escapes (space, tab, newline, backslash).
fn unescape(field: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(field.len());
    let mut i = 0;
    while i < field.len() {
        let escaped = field
            .get(i + 1..i + 4)
            .filter(|digits| field[i] == b'\\' && digits.iter().all(|d| (b'0'..=b'7').contains(d)))
            .and_then(|digits| {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                u8::try_from(value).ok()
            });
        match escaped {
            Some(value) => {
                out.push(value);
                i += 4;
            }
            None => {
                out.push(field[i]);
                i += 1;
            }
        }
    }
    out
}
