// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::io;

/// Fatal errors. Every variant here corresponds to one of the fatal
/// conditions in the format spec: a malformed record, a record out of
/// sequence for the current decoder state, or a read that came up short.
#[derive(Debug)]
pub enum Error {
    /// A record's checksum did not sum to the expected seed.
    BadChecksum,
    /// A record's magic number was not `NFS_MAGIC`.
    BadMagic,
    /// The state machine expected one record type and got another.
    UnexpectedRecord { expected: &'static str, state: &'static str },
    /// The root inode record did not carry inode id 2.
    NotRootInode,
    /// A non-directory inode has no resolvable path and cannot be named.
    NoName(u32),
    /// The input stream ended before the decoder's current request was
    /// satisfied.
    ShortRead { wanted: usize, got: usize },
    /// Propagated I/O failure reading from or writing to the underlying
    /// streams.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadChecksum => write!(f, "invalid dump record checksum"),
            Self::BadMagic => write!(f, "invalid dump record magic"),
            Self::UnexpectedRecord { expected, state } => {
                write!(f, "expecting {expected} record in state {state}")
            }
            Self::NotRootInode => write!(f, "expecting root inode (#2)"),
            Self::NoName(ino) => {
                write!(f, "inode #{ino} has no resolvable name")
            }
            Self::ShortRead { wanted, got } => {
                write!(f, "short read: wanted {wanted} bytes, got {got}")
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
