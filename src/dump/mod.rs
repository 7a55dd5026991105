// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reading a dump(8) volume: wire format parsing and the stream
//! decoder built on top of it.

pub mod decoder;
pub mod format;
