// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Streams a UFS/NFS dump(8) volume into a POSIX ustar+PAX archive.

pub mod driver;
pub mod dump;
pub mod endian;
pub mod result;
pub mod tar;
