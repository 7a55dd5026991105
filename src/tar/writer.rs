// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builds one ustar header (with PAX extended-header fallback) per
//! file, and the two all-zero end-of-archive blocks.

use super::format::{pax_record, FileHeader, Fit, TypeFlag, BLOCK_SIZE};

/// The type of entry a [`File`] describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    Regular,
    Link,
    Symlink,
    CharDev,
    BlockDev,
    Directory,
    Fifo,
}

impl From<FileType> for TypeFlag {
    fn from(t: FileType) -> TypeFlag {
        match t {
            FileType::Regular => TypeFlag::Regular,
            FileType::Link => TypeFlag::Link,
            FileType::Symlink => TypeFlag::Symlink,
            FileType::CharDev => TypeFlag::CharDev,
            FileType::BlockDev => TypeFlag::BlockDev,
            FileType::Directory => TypeFlag::Directory,
            FileType::Fifo => TypeFlag::Fifo,
        }
    }
}

/// One archive entry's metadata, independent of how it was sourced.
#[derive(Clone, Debug, Default)]
pub struct File {
    pub file_type: Option<FileType>,
    pub perms: u16,
    pub path: String,
    pub linkpath: String,
    pub uid: u32,
    pub gid: u32,
    pub uname: String,
    pub gname: String,
    pub size: u64,
    /// Seconds since the epoch, with sub-second precision preserved
    /// when the source inode carried one.
    pub mtime: f64,
    pub ctime: f64,
    pub atime: f64,
    pub device_major: u32,
    pub device_minor: u32,
}

/// The bytes to emit for one archive entry, plus the content framing
/// the caller needs to stream the file body itself.
pub struct WriteResult {
    pub header: Vec<u8>,
    pub content_size: u64,
    pub padding: u64,
}

/// Assembles ustar/PAX headers. Holds the monotonic counter used to
/// name extended-header entries.
pub struct Writer {
    pax_entry_counter: u64,
}

impl Writer {
    pub fn new() -> Writer {
        Writer { pax_entry_counter: 0 }
    }

    /// Builds the header (and, if any field overflows its ustar slot,
    /// a preceding PAX extended-header entry) for `file`.
    pub fn add_file(&mut self, file: &File) -> WriteResult {
        let mut pax = Vec::new();
        let mut header = FileHeader::new();

        write_or_pax(&mut pax, "path", &file.path, |v| header.set_name(v.as_bytes()));

        header.set_mode(file.perms);

        if let Some(t) = file.file_type {
            header.set_type(t.into());
        }

        add_pax_int(&mut pax, "uid", file.uid as i64, |v| header.set_uid(v as u32));
        add_pax_int(&mut pax, "gid", file.gid as i64, |v| header.set_gid(v as u32));
        add_pax_int(&mut pax, "size", file.size as i64, |v| {
            header.set_size(v as u64)
        });

        if file.mtime != 0.0 {
            let whole = file.mtime.trunc();
            if file.mtime == whole {
                add_pax_int(&mut pax, "mtime", whole as i64, |v| {
                    header.set_mtime(v)
                });
            } else {
                header.set_mtime(whole as i64);
                pax.extend(pax_record("mtime", &format!("{:.6}", file.mtime)));
            }
        }
        if file.ctime != 0.0 {
            pax.extend(pax_record("ctime", &format!("{:.6}", file.ctime)));
        }
        if file.atime != 0.0 {
            pax.extend(pax_record("atime", &format!("{:.6}", file.atime)));
        }

        if !file.linkpath.is_empty() {
            write_or_pax(&mut pax, "linkpath", &file.linkpath, |v| {
                header.set_linkname(v.as_bytes())
            });
        }
        if !file.uname.is_empty() {
            write_or_pax(&mut pax, "uname", &file.uname, |v| {
                header.set_uname(v.as_bytes())
            });
        }
        if !file.gname.is_empty() {
            write_or_pax(&mut pax, "gname", &file.gname, |v| {
                header.set_gname(v.as_bytes())
            });
        }

        if file.device_major != 0 || file.device_minor != 0 {
            add_pax_int(&mut pax, "SCHILY.devmajor", file.device_major as i64, |v| {
                header.set_devmajor(v as u32)
            });
            // Correctly tagged SCHILY.devminor: the source this was
            // ported from reuses the devmajor key here by mistake.
            add_pax_int(&mut pax, "SCHILY.devminor", file.device_minor as i64, |v| {
                header.set_devminor(v as u32)
            });
        }

        let header_bytes = header.finalize();

        let mut buffer = Vec::new();
        if !pax.is_empty() {
            buffer.extend(self.pax_header_block(pax.len() as u64));
            buffer.extend_from_slice(&pax);
            let pad = (BLOCK_SIZE - (pax.len() % BLOCK_SIZE)) % BLOCK_SIZE;
            buffer.extend(std::iter::repeat_n(0u8, pad));
        }
        buffer.extend_from_slice(&header_bytes);

        let padding = (BLOCK_SIZE as u64 - (file.size % BLOCK_SIZE as u64))
            % BLOCK_SIZE as u64;
        WriteResult { header: buffer, content_size: file.size, padding }
    }

    /// The two all-zero end-of-archive blocks.
    pub fn close(&self) -> WriteResult {
        WriteResult { header: vec![0u8; 2 * BLOCK_SIZE], content_size: 0, padding: 0 }
    }

    fn pax_header_block(&mut self, pax_size: u64) -> [u8; BLOCK_SIZE] {
        let n = self.pax_entry_counter;
        self.pax_entry_counter += 1;
        let mut header = FileHeader::new();
        header.set_name(format!("./pax_entry_{n}").as_bytes());
        header.set_mode(0o600);
        header.set_type(TypeFlag::PaxAttr);
        header.set_size(pax_size);
        header.finalize()
    }
}

impl Default for Writer {
    fn default() -> Writer {
        Writer::new()
    }
}

/// Writes `value` into the ustar field via `set`; if it doesn't fit,
/// appends a PAX fallback entry instead. Returns whether the ustar
/// field alone was sufficient.
fn write_or_pax(
    pax: &mut Vec<u8>,
    key: &str,
    value: &str,
    set: impl FnOnce(&str) -> Fit,
) -> bool {
    if set(value) != Fit::All {
        pax.extend(pax_record(key, value));
        false
    } else {
        true
    }
}

/// Same as [`write_or_pax`] but for integer fields, where the PAX
/// fallback carries the decimal (not octal) value. A PAX entry backs
/// up the ustar field whenever it isn't a clean fit — `Overwrite`
/// fills the field edge to edge with no terminator, which is
/// recoverable but ambiguous, so it gets the same backup as
/// `Overflow`.
fn add_pax_int(pax: &mut Vec<u8>, key: &str, value: i64, set: impl FnOnce(i64) -> Fit) {
    if set(value) != Fit::All {
        pax.extend(pax_record(key, &value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_file() -> File {
        File {
            file_type: Some(FileType::Regular),
            perms: 0o644,
            path: "a.txt".into(),
            size: 5,
            ..Default::default()
        }
    }

    #[test]
    fn small_regular_file_has_no_pax_block() {
        let mut writer = Writer::new();
        let result = writer.add_file(&base_file());
        assert_eq!(result.header.len(), BLOCK_SIZE);
        assert_eq!(result.content_size, 5);
        assert_eq!(result.padding, BLOCK_SIZE as u64 - 5);
    }

    #[test]
    fn long_path_promotes_to_pax() {
        let mut writer = Writer::new();
        let mut file = base_file();
        file.path = "d/".repeat(60) + "f";
        let result = writer.add_file(&file);
        assert!(result.header.len() > BLOCK_SIZE);
        let pax_text = String::from_utf8_lossy(&result.header).into_owned();
        assert!(pax_text.contains("path="));
    }

    #[test]
    fn fractional_mtime_is_written_as_pax_with_integer_seconds_in_ustar() {
        let mut writer = Writer::new();
        let mut file = base_file();
        file.mtime = 1_700_000_000.5;
        let result = writer.add_file(&file);
        let text = String::from_utf8_lossy(&result.header).into_owned();
        assert!(text.contains("mtime=1700000000.500000"));
    }

    #[test]
    fn device_entries_use_distinct_schily_keys() {
        let mut writer = Writer::new();
        let mut file = base_file();
        file.file_type = Some(FileType::CharDev);
        // Overflows the 8-byte octal field, forcing a PAX fallback;
        // devminor fits cleanly and stays ustar-only.
        file.device_major = 99_999_999;
        file.device_minor = 1;
        let result = writer.add_file(&file);
        let text = String::from_utf8_lossy(&result.header).into_owned();
        assert!(text.contains("SCHILY.devmajor=99999999"));
        assert!(!text.contains("SCHILY.devminor"));
    }

    #[test]
    fn close_emits_two_zero_blocks() {
        let writer = Writer::new();
        let result = writer.close();
        assert_eq!(result.header.len(), 2 * BLOCK_SIZE);
        assert!(result.header.iter().all(|&b| b == 0));
    }
}
