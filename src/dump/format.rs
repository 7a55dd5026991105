// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire layout of a dump volume: records, the embedded inode, and
//! directory entries. Every parser here takes a `&[u8]` slice and reads
//! fields by offset and width (see the table in the spec) rather than
//! overlaying a typed struct on the raw bytes.

use crate::endian;
use crate::result::{Error, Result};
use bitstruct::bitstruct;

/// Size of one record/block in the dump stream.
pub const BLOCK_SIZE: usize = 1024;

/// Dump magic number ("NFS MAGIC", per GNU dump/restore).
pub const MAGIC_NFS: u32 = 60012;

/// Checksum seed: the sum of a valid record's 256 big-endian `i32`s.
const CHECKSUM_SEED: i32 = 84446;

/// The root directory's inode number. Inode numbers are origin 1; 0 is
/// the "unused" marker, inode 1 is reserved, so the root is 2.
pub const ROOT_INODE: u32 = 2;

macro_rules! offsets {
    ($($name:ident = $off:expr;)*) => {
        $(const $name: usize = $off;)*
    };
}

offsets! {
    OFF_TYPE = 0;
    OFF_DATE = 4;
    OFF_PREVIOUS_DATE = 8;
    OFF_VOLUME_ID = 12;
    OFF_BLOCK_ID = 16;
    OFF_INODE_ID = 20;
    OFF_MAGIC = 24;
    OFF_CHECKSUM = 28;
    OFF_INODE = 32;
    OFF_COUNT = 160;
    OFF_LABEL = 676;
    OFF_LEVEL = 692;
    OFF_FILESYSTEM = 696;
    OFF_DEVICE = 760;
    OFF_HOST = 824;
    OFF_FLAGS = 888;
}

const INODE_SIZE: usize = 128;

/// The type of a dump record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordType {
    Tape,
    Inode,
    Bits,
    Addr,
    End,
    Clri,
    /// Any value not in the format's enumeration; carried so validation
    /// can report which unexpected value was seen.
    Other(i32),
}

impl RecordType {
    fn from_raw(v: i32) -> RecordType {
        match v {
            1 => RecordType::Tape,
            2 => RecordType::Inode,
            3 => RecordType::Bits,
            4 => RecordType::Addr,
            5 => RecordType::End,
            6 => RecordType::Clri,
            other => RecordType::Other(other),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordType::Tape => "TAPE",
            RecordType::Inode => "INODE",
            RecordType::Bits => "BITS",
            RecordType::Addr => "ADDR",
            RecordType::End => "END",
            RecordType::Clri => "CLRI",
            RecordType::Other(_) => "UNKNOWN",
        }
    }
}

/// File type carried in the high 4 bits of an inode's mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FileType {
    Fifo = 0o01,
    CharDev = 0o02,
    Directory = 0o04,
    BlockDev = 0o06,
    Regular = 0o10,
    Symlink = 0o12,
    Socket = 0o14,
    /// A mode nibble the format doesn't define.
    Unused = 0,
}

bitstruct! {
    /// The parsed 16-bit inode mode: 12 permission bits (with the
    /// setuid/setgid/sticky bits broken out) plus a 4-bit file type.
    #[derive(Clone, Copy, Debug)]
    pub struct Mode(u16) {
        pub other_exec: bool = 0;
        pub other_write: bool = 1;
        pub other_read: bool = 2;
        pub group_exec: bool = 3;
        pub group_write: bool = 4;
        pub group_read: bool = 5;
        pub user_exec: bool = 6;
        pub user_write: bool = 7;
        pub user_read: bool = 8;
        pub sticky: bool = 9;
        pub setgid: bool = 10;
        pub setuid: bool = 11;
        pub file_type: FileType = 12..=15;
    }
}

impl Mode {
    /// Returns the 12-bit permission value (setuid/setgid/sticky +
    /// rwx for user/group/other), masked off from the file type nibble.
    pub fn perms(self) -> u16 {
        self.0 & 0x0FFF
    }
}

impl bitstruct::FromRaw<u8, FileType> for Mode {
    fn from_raw(raw: u8) -> FileType {
        match raw {
            0o01 => FileType::Fifo,
            0o02 => FileType::CharDev,
            0o04 => FileType::Directory,
            0o06 => FileType::BlockDev,
            0o10 => FileType::Regular,
            0o12 => FileType::Symlink,
            0o14 => FileType::Socket,
            _ => FileType::Unused,
        }
    }
}

impl bitstruct::IntoRaw<u8, FileType> for Mode {
    fn into_raw(bits: FileType) -> u8 {
        bits as u8
    }
}

/// The embedded inode descriptor inside a record.
#[derive(Clone, Copy, Debug)]
pub struct Inode {
    pub mode: Mode,
    pub hardlink_cnt: u16,
    pub uid_small: u16,
    pub gid_small: u16,
    pub size: u64,
    pub atime_us: u64,
    pub mtime_us: u64,
    pub ctime_us: u64,
    pub uid_big: u32,
    pub gid_big: u32,
}

impl Inode {
    /// Returns the 32-bit uid/gid when non-zero, else the 16-bit one,
    /// per the format's large-uid/gid fallback.
    pub fn uid(&self) -> u32 {
        if self.uid_big != 0 { self.uid_big } else { self.uid_small as u32 }
    }

    pub fn gid(&self) -> u32 {
        if self.gid_big != 0 { self.gid_big } else { self.gid_small as u32 }
    }

    fn parse(bytes: &[u8]) -> Inode {
        fn timeval_us(bytes: &[u8]) -> u64 {
            let sec = endian::BeU32::read(&bytes[0..4]).get() as u64;
            let usec = endian::BeU32::read(&bytes[4..8]).get() as u64;
            sec * 1_000_000 + usec
        }

        let mode = Mode(endian::BeU16::read(&bytes[0..2]).get());
        let hardlink_cnt = endian::BeU16::read(&bytes[2..4]).get();
        let uid_small = endian::BeU16::read(&bytes[4..6]).get();
        let gid_small = endian::BeU16::read(&bytes[6..8]).get();
        let size = endian::BeU64::read(&bytes[8..16]).get();
        let atime_us = timeval_us(&bytes[16..24]);
        let mtime_us = timeval_us(&bytes[24..32]);
        let ctime_us = timeval_us(&bytes[32..40]);
        // device_number(4) + direct_blocks(11*4) + indirect(3*4) +
        // flags(4) + blocks(4) + gen(4) = bytes 40..112, unused here.
        let gid_big = endian::BeU32::read(&bytes[112..116]).get();
        let uid_big = endian::BeU32::read(&bytes[116..120]).get();

        Inode {
            mode,
            hardlink_cnt,
            uid_small,
            gid_small,
            size,
            atime_us,
            mtime_us,
            ctime_us,
            uid_big,
            gid_big,
        }
    }
}

/// A parsed record header: the fixed fields every record carries,
/// independent of which union member (`blocks_map`/`inodes_map`)
/// applies.
#[derive(Clone, Copy, Debug)]
pub struct Record {
    pub record_type: RecordType,
    pub inode_id: u32,
    pub count: i32,
    pub inode: Inode,
}

impl Record {
    /// Parses a record header from a full `BLOCK_SIZE` block, without
    /// validating checksum or magic. Used for the continuation peek
    /// where a record's type has already been established to be
    /// plausible.
    pub fn parse(block: &[u8]) -> Record {
        debug_assert_eq!(block.len(), BLOCK_SIZE);
        let record_type =
            RecordType::from_raw(endian::BeI32::read(&block[OFF_TYPE..]).get());
        let inode_id = endian::BeU32::read(&block[OFF_INODE_ID..]).get();
        let count = endian::BeI32::read(&block[OFF_COUNT..]).get();
        let inode = Inode::parse(&block[OFF_INODE..OFF_INODE + INODE_SIZE]);
        Record { record_type, inode_id, count, inode }
    }

    /// Validates checksum and magic, per the spec's §4.2, then parses.
    pub fn validate(block: &[u8]) -> Result<Record> {
        if checksum(block) != CHECKSUM_SEED {
            return Err(Error::BadChecksum);
        }
        let magic = endian::BeI32::read(&block[OFF_MAGIC..]).get() as u32;
        if magic != MAGIC_NFS {
            return Err(Error::BadMagic);
        }
        Ok(Record::parse(block))
    }
}

/// Reinterprets the block as 256 big-endian `i32`s and sums them with
/// 32-bit wraparound.
fn checksum(block: &[u8]) -> i32 {
    debug_assert_eq!(block.len(), BLOCK_SIZE);
    let mut sum: i32 = 0;
    for chunk in block.chunks_exact(4) {
        sum = sum.wrapping_add(endian::BeI32::read(chunk).get());
    }
    sum
}

/// One entry parsed from a directory data block.
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub inode_id: u32,
    pub name: Vec<u8>,
}

/// Parses every directory entry packed into `block`, skipping
/// tombstones (`inode_id == 0`) and `.`/`..`. Malformed trailing
/// entries (a record length of zero, or a name length that would run
/// past the block) end iteration early rather than panicking, since a
/// directory block is not guaranteed to be packed to the last byte.
pub fn parse_directory_block(block: &[u8]) -> Vec<DirEntry> {
    const PREFIX_LEN: usize = 8;
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos + PREFIX_LEN <= block.len() {
        let inode_id = endian::BeU32::read(&block[pos..pos + 4]).get();
        let record_length =
            endian::BeU16::read(&block[pos + 4..pos + 6]).get() as usize;
        let name_len = block[pos + 7] as usize;
        if record_length == 0 {
            break;
        }
        if pos + PREFIX_LEN + name_len > block.len() {
            break;
        }
        let name = &block[pos + PREFIX_LEN..pos + PREFIX_LEN + name_len];
        let is_dot_entry = matches!(name, b"." | b"..");
        if inode_id != 0 && !is_dot_entry {
            entries.push(DirEntry { inode_id, name: name.to_vec() });
        }
        pos += record_length;
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_decodes_type_and_perms() {
        // Regular file, 0644.
        let mode = Mode(0o100644);
        assert_eq!(mode.file_type(), FileType::Regular);
        assert_eq!(mode.perms(), 0o644);
        assert!(mode.user_read());
        assert!(mode.user_write());
        assert!(!mode.user_exec());
    }

    #[test]
    fn large_uid_gid_read_from_correct_offsets() {
        let mut bytes = [0u8; INODE_SIZE];
        bytes[4..6].copy_from_slice(&9u16.to_be_bytes());
        bytes[6..8].copy_from_slice(&7u16.to_be_bytes());
        bytes[112..116].copy_from_slice(&70000u32.to_be_bytes());
        bytes[116..120].copy_from_slice(&80000u32.to_be_bytes());

        let inode = Inode::parse(&bytes);
        assert_eq!(inode.uid_small, 9);
        assert_eq!(inode.gid_small, 7);
        assert_eq!(inode.gid(), 70000);
        assert_eq!(inode.uid(), 80000);
    }

    #[test]
    fn directory_block_skips_tombstones_and_dot_entries() {
        let mut block = vec![0u8; BLOCK_SIZE];
        // Entry 0: "." -> inode 5, reclen 12.
        block[0..4].copy_from_slice(&5u32.to_be_bytes());
        block[4..6].copy_from_slice(&12u16.to_be_bytes());
        block[7] = 1;
        block[8] = b'.';
        // Entry 1: ".." -> inode 2, reclen 12.
        block[12..16].copy_from_slice(&2u32.to_be_bytes());
        block[16..18].copy_from_slice(&12u16.to_be_bytes());
        block[19] = 2;
        block[20..22].copy_from_slice(b"..");
        // Entry 2: tombstone, inode 0, reclen 12.
        block[24..28].copy_from_slice(&0u32.to_be_bytes());
        block[28..30].copy_from_slice(&12u16.to_be_bytes());
        // Entry 3: "a.txt" -> inode 10, reclen big enough, consumes rest.
        let rest = BLOCK_SIZE - 36;
        block[36..40].copy_from_slice(&10u32.to_be_bytes());
        block[40..42].copy_from_slice(&(rest as u16).to_be_bytes());
        block[43] = 5;
        block[44..49].copy_from_slice(b"a.txt");

        let entries = parse_directory_block(&block);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].inode_id, 10);
        assert_eq!(entries[0].name, b"a.txt");
    }

    #[test]
    fn checksum_matches_seed_for_all_zero_but_one_field() {
        let mut block = vec![0u8; BLOCK_SIZE];
        block[BLOCK_SIZE - 4..].copy_from_slice(&CHECKSUM_SEED.to_be_bytes());
        assert_eq!(checksum(&block), CHECKSUM_SEED);
    }
}
