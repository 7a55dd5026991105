// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The dump stream state machine: consumes fixed blocks the caller
//! feeds it, reconstructs the inverse directory tree, and emits a
//! typed action stream. Pure with respect to I/O — the decoder never
//! reads or writes a stream itself, the caller does, in response to
//! the actions it returns from [`Decoder::next`].

use std::collections::HashMap;

use super::format::{self, FileType, Mode, RecordType, BLOCK_SIZE, ROOT_INODE};
use crate::result::{Error, Result};

/// A file descriptor as emitted by the decoder: everything the driver
/// needs to build a tar header, decoupled from the wire inode layout.
#[derive(Clone, Copy, Debug)]
pub struct FileDescriptor {
    pub inode_id: u32,
    pub hardlink_cnt: u16,
    pub mode: Mode,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime_us: u64,
    pub mtime_us: u64,
    pub ctime_us: u64,
}

impl FileDescriptor {
    fn from_record(record: &format::Record) -> FileDescriptor {
        let inode = &record.inode;
        FileDescriptor {
            inode_id: record.inode_id,
            hardlink_cnt: inode.hardlink_cnt,
            mode: inode.mode,
            uid: inode.uid(),
            gid: inode.gid(),
            size: inode.size,
            atime_us: inode.atime_us,
            mtime_us: inode.mtime_us,
            ctime_us: inode.ctime_us,
        }
    }
}

/// The action the decoder hands back to the caller at each step.
#[derive(Clone, Copy, Debug)]
pub enum Action {
    /// The caller must read exactly `BLOCK_SIZE` bytes and call
    /// [`Decoder::feed`] before calling [`Decoder::next`] again.
    FeedBlock,
    /// The caller must discard exactly `size` bytes from the stream.
    Skip { size: u64 },
    /// A file descriptor was decoded. If `hardlink_cnt > 0` and
    /// `size > 0`, one or more [`Action::Data`] actions follow.
    Inode(FileDescriptor),
    /// The caller must forward `size` bytes of content (if it wants
    /// them) and then discard `padding` bytes, in that order.
    Data { size: u64, padding: u64 },
    /// The dump stream is exhausted. Terminal.
    Done,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    WaitingFirstBlock,
    ReadingTapeHeader,
    ReadingClriHeader,
    SkippingClriMap,
    ReadingBitsHeader,
    SkippingBitsMap,
    ReadingRootInode,
    WaitingDirectoryContent,
    ReadingDirectoryContent,
    WaitingInode,
    ReadingInode,
    ReadingValidatedInode,
    SkippingInodeContent,
    WaitingContinuation,
    ReadingContinuation,
    Done,
}

/// One `{name, parent}` pair for an inode in the reverse tree. A given
/// inode id can have more than one such entry when hardlinks exist.
#[derive(Clone, Debug)]
struct TreeEntry {
    name: Vec<u8>,
    parent: u32,
}

/// The dump stream decoder. Owns the current block buffer (pushed in
/// by the caller via [`Decoder::feed`]), the reverse directory tree,
/// and the directory-walk bookkeeping (`blocks_left`/`content_left`).
pub struct Decoder {
    state: State,
    continuation_then: State,
    continuation_else: State,
    block: [u8; BLOCK_SIZE],
    reverse_tree: HashMap<u32, Vec<TreeEntry>>,
    current_inode: u32,
    blocks_left: i32,
    content_left: u64,
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder {
            state: State::WaitingFirstBlock,
            continuation_then: State::Done,
            continuation_else: State::Done,
            block: [0u8; BLOCK_SIZE],
            reverse_tree: HashMap::new(),
            current_inode: 0,
            blocks_left: 0,
            content_left: 0,
        }
    }

    /// Supplies the block the caller just read, for the decoder to
    /// examine on the next call to [`Decoder::next`]. Must be called
    /// with exactly `BLOCK_SIZE` bytes after every [`Action::FeedBlock`].
    pub fn feed(&mut self, block: &[u8]) {
        debug_assert_eq!(block.len(), BLOCK_SIZE);
        self.block.copy_from_slice(block);
    }

    /// Advances the state machine and returns the next action.
    pub fn next(&mut self) -> Result<Action> {
        loop {
            match self.state {
                State::WaitingFirstBlock => {
                    self.state = State::ReadingTapeHeader;
                    return Ok(Action::FeedBlock);
                }
                State::ReadingTapeHeader => {
                    let record = self.validate_record()?;
                    self.expect(record.record_type, RecordType::Tape)?;
                    self.state = State::ReadingClriHeader;
                    return Ok(Action::FeedBlock);
                }
                State::ReadingClriHeader => {
                    let record = self.validate_record()?;
                    self.expect(record.record_type, RecordType::Clri)?;
                    self.state = State::SkippingClriMap;
                    continue;
                }
                State::SkippingClriMap => {
                    let record = self.record();
                    let count = record.count;
                    self.wait_if_continuation_then_else(
                        State::SkippingClriMap,
                        State::ReadingBitsHeader,
                    );
                    return Ok(Action::Skip {
                        size: count as u64 * BLOCK_SIZE as u64,
                    });
                }
                State::ReadingBitsHeader => {
                    let record = self.validate_record()?;
                    self.expect(record.record_type, RecordType::Bits)?;
                    self.state = State::SkippingBitsMap;
                    continue;
                }
                State::SkippingBitsMap => {
                    let record = self.record();
                    let count = record.count;
                    self.wait_if_continuation_then_else(
                        State::SkippingBitsMap,
                        State::ReadingRootInode,
                    );
                    return Ok(Action::Skip {
                        size: count as u64 * BLOCK_SIZE as u64,
                    });
                }
                State::ReadingRootInode => {
                    let record = self.validate_record()?;
                    self.expect(record.record_type, RecordType::Inode)?;
                    if record.inode_id != ROOT_INODE {
                        return Err(Error::NotRootInode);
                    }
                    self.reverse_tree.insert(
                        ROOT_INODE,
                        vec![TreeEntry { name: b"/".to_vec(), parent: 0 }],
                    );
                    self.current_inode = ROOT_INODE;
                    self.blocks_left = record.count;
                    self.state = State::WaitingDirectoryContent;
                    return Ok(Action::Inode(FileDescriptor::from_record(
                        &record,
                    )));
                }
                State::WaitingDirectoryContent => {
                    self.state = State::ReadingDirectoryContent;
                    return Ok(Action::FeedBlock);
                }
                State::ReadingDirectoryContent => {
                    let entries =
                        format::parse_directory_block(&self.block);
                    for entry in entries {
                        self.reverse_tree.entry(entry.inode_id).or_default().push(
                            TreeEntry {
                                name: entry.name,
                                parent: self.current_inode,
                            },
                        );
                    }
                    self.blocks_left -= 1;
                    if self.blocks_left == 0 {
                        self.if_continuation_then_else(
                            State::ReadingDirectoryContent,
                            State::ReadingValidatedInode,
                        );
                    }
                    return Ok(Action::FeedBlock);
                }
                State::WaitingInode => {
                    self.state = State::ReadingInode;
                    return Ok(Action::FeedBlock);
                }
                State::ReadingInode => {
                    self.validate_record()?;
                    self.state = State::ReadingValidatedInode;
                    continue;
                }
                State::ReadingValidatedInode => {
                    let record = self.record();
                    if record.record_type == RecordType::End {
                        let count = record.count;
                        self.state = State::Done;
                        return Ok(Action::Skip {
                            size: count as u64 * BLOCK_SIZE as u64,
                        });
                    }
                    if record.record_type != RecordType::Inode {
                        return Err(Error::UnexpectedRecord {
                            expected: "INODE",
                            state: "READING_VALIDATED_INODE",
                        });
                    }
                    if record.inode.mode.file_type() == FileType::Directory {
                        self.current_inode = record.inode_id;
                        self.blocks_left = record.count;
                        self.state = State::WaitingDirectoryContent;
                    } else if record.inode.size > 0 {
                        self.content_left = record.inode.size;
                        self.state = State::SkippingInodeContent;
                    } else {
                        self.state = State::WaitingInode;
                    }
                    return Ok(Action::Inode(FileDescriptor::from_record(
                        &record,
                    )));
                }
                State::SkippingInodeContent => {
                    let record = self.record();
                    let count = record.count;
                    self.wait_if_continuation_then_else(
                        State::SkippingInodeContent,
                        State::ReadingValidatedInode,
                    );
                    let total_size = count as u64 * BLOCK_SIZE as u64;
                    let content_size =
                        std::cmp::min(self.content_left, total_size);
                    self.content_left -= content_size;
                    return Ok(Action::Data {
                        size: content_size,
                        padding: total_size - content_size,
                    });
                }
                State::WaitingContinuation => {
                    self.state = State::ReadingContinuation;
                    return Ok(Action::FeedBlock);
                }
                State::ReadingContinuation => {
                    let record = self.validate_record()?;
                    self.state = if record.record_type == RecordType::Addr {
                        self.continuation_then
                    } else {
                        self.continuation_else
                    };
                    continue;
                }
                State::Done => return Ok(Action::Done),
            }
        }
    }

    fn expect(&self, got: RecordType, want: RecordType) -> Result<()> {
        if got != want {
            return Err(Error::UnexpectedRecord {
                expected: want.name(),
                state: "validation",
            });
        }
        Ok(())
    }

    fn validate_record(&self) -> Result<format::Record> {
        format::Record::validate(&self.block)
    }

    fn record(&self) -> format::Record {
        format::Record::parse(&self.block)
    }

    fn wait_if_continuation_then_else(&mut self, then: State, els: State) {
        self.continuation_then = then;
        self.continuation_else = els;
        self.state = State::WaitingContinuation;
    }

    fn if_continuation_then_else(&mut self, then: State, els: State) {
        self.continuation_then = then;
        self.continuation_else = els;
        self.state = State::ReadingContinuation;
    }

    /// Returns all absolute paths for `inode`. Only regular files can
    /// return more than one entry (hardlinks); `ROOT_INODE` always
    /// returns exactly `["/"]`.
    pub fn resolve_paths(&self, inode: u32) -> Vec<Vec<u8>> {
        if inode == ROOT_INODE {
            return vec![b"/".to_vec()];
        }
        let Some(entries) = self.reverse_tree.get(&inode) else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| {
                let mut path = self.resolve_directory_path(entry.parent)?;
                path.extend_from_slice(&entry.name);
                Some(path)
            })
            .collect()
    }

    /// Returns the parent inode ids of every reverse-tree entry for
    /// `inode`.
    pub fn parents(&self, inode: u32) -> Vec<u32> {
        self.reverse_tree
            .get(&inode)
            .map(|entries| entries.iter().map(|e| e.parent).collect())
            .unwrap_or_default()
    }

    /// The single-path directory resolver: valid because non-root
    /// directories have no hardlinks, so there is at most one entry to
    /// follow. Returns `None` if the chain is not (yet) fully known.
    fn resolve_directory_path(&self, inode: u32) -> Option<Vec<u8>> {
        if inode == ROOT_INODE {
            return Some(b"/".to_vec());
        }
        let entries = self.reverse_tree.get(&inode)?;
        let entry = entries.first()?;
        let mut path = self.resolve_directory_path(entry.parent)?;
        path.extend_from_slice(&entry.name);
        path.push(b'/');
        Some(path)
    }
}

impl Default for Decoder {
    fn default() -> Decoder {
        Decoder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_resolves_to_slash() {
        let decoder = Decoder::new();
        assert_eq!(decoder.resolve_paths(ROOT_INODE), vec![b"/".to_vec()]);
    }

    #[test]
    fn unknown_inode_has_no_paths() {
        let decoder = Decoder::new();
        assert!(decoder.resolve_paths(999).is_empty());
    }

    #[test]
    fn single_child_resolves_under_root() {
        let mut decoder = Decoder::new();
        decoder.reverse_tree.insert(
            ROOT_INODE,
            vec![TreeEntry { name: b"/".to_vec(), parent: 0 }],
        );
        decoder.reverse_tree.insert(
            10,
            vec![TreeEntry { name: b"a.txt".to_vec(), parent: ROOT_INODE }],
        );
        assert_eq!(decoder.resolve_paths(10), vec![b"/a.txt".to_vec()]);
        assert_eq!(decoder.parents(10), vec![ROOT_INODE]);
    }

    #[test]
    fn hardlinks_produce_multiple_paths() {
        let mut decoder = Decoder::new();
        decoder.reverse_tree.insert(
            ROOT_INODE,
            vec![TreeEntry { name: b"/".to_vec(), parent: 0 }],
        );
        decoder.reverse_tree.insert(
            11,
            vec![
                TreeEntry { name: b"first".to_vec(), parent: ROOT_INODE },
                TreeEntry { name: b"second".to_vec(), parent: ROOT_INODE },
            ],
        );
        let mut paths = decoder.resolve_paths(11);
        paths.sort();
        assert_eq!(paths, vec![b"/first".to_vec(), b"/second".to_vec()]);
    }

    #[test]
    fn deep_path_resolves_through_nested_directories() {
        let mut decoder = Decoder::new();
        decoder.reverse_tree.insert(
            ROOT_INODE,
            vec![TreeEntry { name: b"/".to_vec(), parent: 0 }],
        );
        decoder.reverse_tree.insert(
            15,
            vec![TreeEntry { name: b"x".to_vec(), parent: ROOT_INODE }],
        );
        decoder.reverse_tree.insert(
            16,
            vec![TreeEntry { name: b"y".to_vec(), parent: 15 }],
        );
        decoder.reverse_tree.insert(
            20,
            vec![TreeEntry { name: b"file".to_vec(), parent: 16 }],
        );
        assert_eq!(decoder.resolve_paths(20), vec![b"/x/y/file".to_vec()]);
    }

    #[test]
    fn unresolved_parent_yields_no_path() {
        let mut decoder = Decoder::new();
        // inode 20's parent (16) is not yet in the tree.
        decoder.reverse_tree.insert(
            20,
            vec![TreeEntry { name: b"file".to_vec(), parent: 16 }],
        );
        assert!(decoder.resolve_paths(20).is_empty());
    }
}
