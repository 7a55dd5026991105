// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The block-feeding loop: pumps bytes between a dump stream decoder
//! and a tar writer, and owns the directory-deferral policy that
//! keeps a directory's header ahead of its children in the output.

use std::collections::HashMap;
use std::io::{Read, Write};

use crate::dump::decoder::{Action, Decoder, FileDescriptor};
use crate::dump::format::{FileType, ROOT_INODE};
use crate::result::{Error, Result};
use crate::tar::writer::{self, Writer};

const COPY_CHUNK: usize = 64 * 1024;

/// Runs the converter end to end: reads a dump stream from `input`,
/// writes a ustar+PAX archive to `output`.
pub fn run<R: Read, W: Write>(mut input: R, mut output: W) -> Result<()> {
    let mut decoder = Decoder::new();
    let mut writer = Writer::new();
    let mut pending_dirs: HashMap<u32, FileDescriptor> = HashMap::new();

    // Accounting for the file currently streaming its content, set
    // when a REGULAR file's header is written and drained to zero as
    // DATA actions arrive.
    let mut copying: Option<CopyState> = None;

    loop {
        match decoder.next()? {
            Action::FeedBlock => {
                let mut block = [0u8; crate::dump::format::BLOCK_SIZE];
                read_exact_counted(&mut input, &mut block)?;
                decoder.feed(&block);
            }
            Action::Skip { size } => {
                discard(&mut input, size)?;
            }
            Action::Inode(descriptor) => {
                handle_inode(
                    &decoder,
                    &mut writer,
                    &mut pending_dirs,
                    &mut output,
                    &mut copying,
                    descriptor,
                )?;
            }
            Action::Data { size, padding } => {
                copy_content(&mut input, &mut output, &mut copying, size)?;
                discard(&mut input, padding)?;
            }
            Action::Done => {
                flush_remaining(&decoder, &mut writer, &mut pending_dirs, &mut output)?;
                let result = writer.close();
                output.write_all(&result.header)?;
                return Ok(());
            }
        }
    }
}

struct CopyState {
    remaining: u64,
    padding: u64,
}

fn handle_inode<W: Write>(
    decoder: &Decoder,
    writer: &mut Writer,
    pending_dirs: &mut HashMap<u32, FileDescriptor>,
    output: &mut W,
    copying: &mut Option<CopyState>,
    descriptor: FileDescriptor,
) -> Result<()> {
    if descriptor.inode_id != ROOT_INODE && descriptor.hardlink_cnt == 0 {
        return Ok(());
    }

    let is_directory = descriptor.mode.file_type() == FileType::Directory;

    if is_directory {
        pending_dirs.insert(descriptor.inode_id, descriptor);
        return Ok(());
    }

    for parent in decoder.parents(descriptor.inode_id) {
        try_flush_directory(decoder, writer, pending_dirs, output, parent)?;
    }

    let paths = decoder.resolve_paths(descriptor.inode_id);
    let Some(path) = paths.last() else {
        return Err(Error::NoName(descriptor.inode_id));
    };
    let path = String::from_utf8_lossy(path).into_owned();

    let Some(file_type) = supported_file_type(descriptor, &path) else {
        return Ok(());
    };

    let mut file = to_tar_file(&descriptor, file_type, path);
    if file_type == writer::FileType::Regular {
        file.size = descriptor.size;
    }

    let result = writer.add_file(&file);
    output.write_all(&result.header)?;
    if file_type == writer::FileType::Regular && result.content_size > 0 {
        *copying = Some(CopyState { remaining: result.content_size, padding: result.padding });
    }
    Ok(())
}

/// Returns `None` (after logging a warning) for object kinds this
/// converter does not emit headers for at all: sockets, symlinks,
/// FIFOs, char/block devices, and unrecognized mode nibbles.
fn supported_file_type(
    descriptor: FileDescriptor,
    path: &str,
) -> Option<writer::FileType> {
    match descriptor.mode.file_type() {
        FileType::Regular => Some(writer::FileType::Regular),
        FileType::Socket => {
            eprintln!("ignoring socket file {path}");
            None
        }
        FileType::Symlink => {
            eprintln!("symlink !implemented {path}");
            None
        }
        FileType::Fifo => {
            eprintln!("fifo !implemented {path}");
            None
        }
        FileType::CharDev | FileType::BlockDev => {
            eprintln!("dev files !implemented {path}");
            None
        }
        FileType::Directory => unreachable!("directories are handled by the caller"),
        FileType::Unused => {
            eprintln!("unrecognized mode for {path}, skipping");
            None
        }
    }
}

fn to_tar_file(
    descriptor: &FileDescriptor,
    file_type: writer::FileType,
    path: String,
) -> writer::File {
    writer::File {
        file_type: Some(file_type),
        perms: descriptor.mode.perms(),
        path,
        uid: descriptor.uid,
        gid: descriptor.gid,
        mtime: descriptor.mtime_us as f64 / 1_000_000.0,
        atime: descriptor.atime_us as f64 / 1_000_000.0,
        ctime: descriptor.ctime_us as f64 / 1_000_000.0,
        ..Default::default()
    }
}

/// Directory path as emitted in the archive always carries a trailing
/// slash, except the root itself, whose resolved path already is one.
fn directory_filename(path: &[u8]) -> String {
    let text = String::from_utf8_lossy(path).into_owned();
    if text.ends_with('/') { text } else { text + "/" }
}

fn try_flush_directory<W: Write>(
    decoder: &Decoder,
    writer: &mut Writer,
    pending_dirs: &mut HashMap<u32, FileDescriptor>,
    output: &mut W,
    inode_id: u32,
) -> Result<()> {
    let Some(descriptor) = pending_dirs.get(&inode_id) else {
        return Ok(());
    };
    let paths = decoder.resolve_paths(inode_id);
    let Some(path) = paths.last() else {
        eprintln!("directory !yet resolved #{inode_id}");
        return Ok(());
    };
    let filename = directory_filename(path);
    eprintln!("flushing directory entry #{inode_id} - {filename}");
    let file = to_tar_file(descriptor, writer::FileType::Directory, filename);
    let result = writer.add_file(&file);
    output.write_all(&result.header)?;
    pending_dirs.remove(&inode_id);
    Ok(())
}

fn flush_remaining<W: Write>(
    decoder: &Decoder,
    writer: &mut Writer,
    pending_dirs: &mut HashMap<u32, FileDescriptor>,
    output: &mut W,
) -> Result<()> {
    let inode_ids: Vec<u32> = pending_dirs.keys().copied().collect();
    for inode_id in inode_ids {
        try_flush_directory(decoder, writer, pending_dirs, output, inode_id)?;
    }
    for inode_id in pending_dirs.keys() {
        eprintln!("directory entry never resolved #{inode_id}");
    }
    Ok(())
}

fn copy_content<R: Read, W: Write>(
    input: &mut R,
    output: &mut W,
    copying: &mut Option<CopyState>,
    mut remaining: u64,
) -> Result<()> {
    let mut buf = [0u8; COPY_CHUNK];
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        read_exact_counted(input, &mut buf[..chunk])?;
        if let Some(state) = copying {
            output.write_all(&buf[..chunk])?;
            state.remaining -= chunk as u64;
            if state.remaining == 0 {
                let padding = state.padding;
                write_zeroes(output, padding)?;
                *copying = None;
            }
        }
        remaining -= chunk as u64;
    }
    Ok(())
}

fn discard<R: Read>(input: &mut R, mut remaining: u64) -> Result<()> {
    let mut buf = [0u8; COPY_CHUNK];
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        read_exact_counted(input, &mut buf[..chunk])?;
        remaining -= chunk as u64;
    }
    Ok(())
}

fn write_zeroes<W: Write>(output: &mut W, mut remaining: u64) -> Result<()> {
    let buf = [0u8; COPY_CHUNK];
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        output.write_all(&buf[..chunk])?;
        remaining -= chunk as u64;
    }
    Ok(())
}

fn read_exact_counted<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut got = 0;
    while got < buf.len() {
        match r.read(&mut buf[got..])? {
            0 => return Err(Error::ShortRead { wanted: buf.len(), got }),
            n => got += n,
        }
    }
    Ok(())
}
