// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Zero-copy big-endian integer views over a byte slice.
//!
//! Every on-wire dump field is big-endian. Rather than overlay a
//! `#[repr(C)]` struct on the raw block (which requires unaligned
//! pointer reads and assumes a particular compiler layout), each field
//! is read by explicit offset and width, the way the format's offset
//! table in the spec is written. These are thin, `Copy` newtypes over
//! the bytes; there is no write path, since a dump stream is read-only.

macro_rules! be_type {
    ($name:ident, $inner:ty, $width:literal) => {
        /// A big-endian
        #[doc = stringify!($inner)]
        /// field read from a byte slice.
        #[derive(Clone, Copy, Debug, Eq, PartialEq)]
        pub struct $name($inner);

        impl $name {
            /// Reads a big-endian value from the first
            #[doc = stringify!($width)]
            /// bytes of `bytes`.
            pub fn read(bytes: &[u8]) -> $name {
                $name(<$inner>::from_be_bytes(bytes[..$width].try_into().unwrap()))
            }

            /// The host-endian value.
            pub fn get(self) -> $inner {
                self.0
            }
        }
    };
}

be_type!(BeU16, u16, 2);
be_type!(BeU32, u32, 4);
be_type!(BeU64, u64, 8);
be_type!(BeI32, i32, 4);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_big_endian() {
        assert_eq!(BeU16::read(&[0x01, 0x02]).get(), 0x0102);
        assert_eq!(BeU32::read(&[0x00, 0x00, 0xea, 0x6c]).get(), 60012);
        assert_eq!(BeI32::read(&[0xff, 0xff, 0xff, 0xff]).get(), -1);
        assert_eq!(
            BeU64::read(&[0, 0, 0, 0, 0x00, 0x00, 0x04, 0x00]).get(),
            1024
        );
    }
}
