//! On-disk record layouts of a DfuSe file (UM0391).
//!
//! ```text
//! file    = prefix image* suffix
//! image   = image_prefix (element_prefix payload)*
//! ```
//!
//! Every multi-byte field is little endian.

use static_assertions::const_assert_eq;
use std::mem;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::little_endian::{U16, U32},
};

use crate::DfuseError;

pub const DFUSE_SIGNATURE: [u8; 5] = *b"DfuSe";
pub const DFUSE_VERSION: u8 = 0x01;

pub const TARGET_SIGNATURE: [u8; 6] = *b"Target";
pub const TARGET_NAME_LEN: usize = 255;
/// Longest name that still leaves room for a terminating NUL.
pub const TARGET_NAME_MAX: usize = TARGET_NAME_LEN - 1;

pub const DFU_FORMAT_DFUSE: u16 = 0x011A;
pub const DFU_SUFFIX_SIGNATURE: [u8; 3] = *b"UFD";

pub const FILE_PREFIX_SIZE: usize = 11;
pub const IMAGE_PREFIX_SIZE: usize = 274;
pub const ELEMENT_PREFIX_SIZE: usize = 8;
pub const FILE_SUFFIX_SIZE: usize = 16;
pub const CRC_SIZE: usize = 4;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C)]
pub struct FilePrefix {
    pub signature: [u8; 5],
    pub version: u8,
    /// Size of the file without the suffix.
    pub file_size: U32,
    pub image_count: u8,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C)]
pub struct ImagePrefix {
    pub signature: [u8; 6],
    pub alt_setting: u8,
    pub named: U32,
    pub name: [u8; TARGET_NAME_LEN],
    /// Size of all elements of the image, element prefixes included.
    pub element_size: U32,
    pub element_count: U32,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C)]
pub struct ElementPrefix {
    pub address: U32,
    pub size: U32,
}

/// The suffix without its trailing checksum, i.e. the last bytes covered by
/// the CRC.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C)]
pub struct FileSuffix {
    pub device_version: U16,
    pub product_id: U16,
    pub vendor_id: U16,
    pub dfu_format: U16,
    pub signature: [u8; 3],
    pub length: u8,
}

const_assert_eq!(mem::size_of::<FilePrefix>(), FILE_PREFIX_SIZE);
const_assert_eq!(mem::size_of::<ImagePrefix>(), IMAGE_PREFIX_SIZE);
const_assert_eq!(mem::size_of::<ElementPrefix>(), ELEMENT_PREFIX_SIZE);
const_assert_eq!(mem::size_of::<FileSuffix>() + CRC_SIZE, FILE_SUFFIX_SIZE);

/// Cursor over an in-memory DfuSe file.
///
/// All reads are bounds checked up front, a record that does not fit into
/// the remaining input is reported as truncated instead of being cut short.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    pub fn take(&mut self, len: usize, record: &'static str) -> Result<&'a [u8], DfuseError> {
        if len > self.remaining() {
            return Err(DfuseError::Truncated {
                record,
                offset: self.offset,
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub fn read<T: FromBytes>(&mut self, record: &'static str) -> Result<T, DfuseError> {
        let offset = self.offset;
        let bytes = self.take(mem::size_of::<T>(), record)?;
        T::read_from_bytes(bytes).map_err(|_| DfuseError::Truncated {
            record,
            offset,
            needed: mem::size_of::<T>(),
            available: bytes.len(),
        })
    }
}

/// Builds the fixed width name field. Names longer than [`TARGET_NAME_MAX`]
/// bytes are cut on a character boundary so at least one NUL always follows.
pub fn encode_name(name: &str) -> [u8; TARGET_NAME_LEN] {
    let mut field = [0u8; TARGET_NAME_LEN];
    let mut len = name.len().min(TARGET_NAME_MAX);
    while !name.is_char_boundary(len) {
        len -= 1;
    }
    field[..len].copy_from_slice(&name.as_bytes()[..len]);
    field
}

/// Reads a name field up to its first NUL.
pub fn decode_name(field: &[u8; TARGET_NAME_LEN]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
