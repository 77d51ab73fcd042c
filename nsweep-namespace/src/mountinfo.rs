//! `/proc/<pid>/mountinfo` parsing

use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use nsweep_core::{Error, Result};
use serde::{Serialize, Serializer};

/// One line of a mount table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountInfo {
    /// Unique mount ID
    pub mount_id: u32,
    /// ID of the parent mount
    pub parent_id: u32,
    /// Device major number
    pub major: u32,
    /// Device minor number
    pub minor: u32,
    /// Root of the mount within its filesystem
    pub root: String,
    /// Mount point relative to the process root
    #[serde(serialize_with = "serialize_path")]
    pub mount_point: PathBuf,
    /// Per-mount options
    pub mount_options: String,
    /// Optional tagged fields, such as `shared:1`
    pub tags: Vec<String>,
    /// Filesystem type
    pub fs_type: String,
    /// Filesystem-specific source
    pub source: String,
    /// Per-superblock options
    pub super_options: String,
}

impl MountInfo {
    /// Whether this is a bind mount of a namespace file
    #[must_use]
    pub fn is_nsfs(&self) -> bool {
        self.fs_type == "nsfs"
    }
}

/// Undo the octal escaping (`\040` and friends) of mountinfo paths.
fn unescape(field: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(field.len());
    let mut i = 0;
    while i < field.len() {
        if field[i] == b'\\' && i + 4 <= field.len() {
            let digits = &field[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0_u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(field[i]);
        i += 1;
    }
    out
}

fn text(field: &[u8]) -> String {
    String::from_utf8_lossy(field).into_owned()
}

/// Parse a single mountinfo line
///
/// Paths are kept byte for byte; mount points need not be valid UTF-8.
///
/// # Errors
/// Returns [`Error::Parse`] if fields are missing or malformed.
pub fn parse_line(line: impl AsRef<[u8]>) -> Result<MountInfo> {
    let line = line.as_ref();
    let malformed = |message: &str| Error::Parse {
        what: "mountinfo",
        message: format!("{message}: {:?}", String::from_utf8_lossy(line)),
    };
    let fields: Vec<&[u8]> = line.split(|b| *b == b' ').collect();
    let separator = fields
        .iter()
        .position(|f| *f == b"-")
        .ok_or_else(|| malformed("missing separator"))?;
    if separator < 6 || fields.len() < separator + 4 {
        return Err(malformed("too few fields"));
    }
    let number = |f: &[u8]| {
        std::str::from_utf8(f)
            .ok()
            .and_then(|f| f.parse::<u32>().ok())
            .ok_or_else(|| malformed("invalid number"))
    };
    let device = fields[2];
    let colon = device
        .iter()
        .position(|b| *b == b':')
        .ok_or_else(|| malformed("invalid device"))?;
    Ok(MountInfo {
        mount_id: number(fields[0])?,
        parent_id: number(fields[1])?,
        major: number(&device[..colon])?,
        minor: number(&device[colon + 1..])?,
        root: text(&unescape(fields[3])),
        mount_point: PathBuf::from(OsString::from_vec(unescape(fields[4]))),
        mount_options: text(fields[5]),
        tags: fields[6..separator].iter().map(|f| text(f)).collect(),
        fs_type: text(fields[separator + 1]),
        source: text(&unescape(fields[separator + 2])),
        super_options: text(fields[separator + 3]),
    })
}

/// Parse a whole mount table, skipping malformed lines
#[must_use]
pub fn parse(table: impl AsRef<[u8]>) -> Vec<MountInfo> {
    table
        .as_ref()
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .filter_map(|line| match parse_line(line) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping mountinfo line");
                None
            }
        })
        .collect()
}

fn serialize_path<S: Serializer>(path: &Path, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.to_string_lossy())
}
