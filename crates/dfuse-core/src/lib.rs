//! Reader and writer for ST DfuSe firmware files (UM0391).
//!
//! A DfuSe file holds one or more [`Image`]s, each made up of one or more
//! [`Target`]s (address + payload), followed by a USB DFU suffix carrying the
//! vendor/product ids and a CRC32 over everything before it.
//!
//! ```no_run
//! use dfuse_core::{DfuseFile, Image, Target};
//!
//! let mut image = Image::new(0, Some("Internal Flash"));
//! image.add_target(Target::from_file(0x0800_0000, "app.bin")?);
//!
//! let mut file = DfuseFile::new(0x0483, 0xDF11, 0x0200);
//! file.add_image(image)?;
//! file.save("app.dfu")?;
//! # Ok::<(), dfuse_core::DfuseError>(())
//! ```

use crate::{
    crc32::{Checksummed, Crc32},
    dfuse::{
        ByteReader, CRC_SIZE, DFU_FORMAT_DFUSE, DFU_SUFFIX_SIGNATURE, DFUSE_SIGNATURE,
        DFUSE_VERSION, FILE_PREFIX_SIZE, FILE_SUFFIX_SIZE, FilePrefix, FileSuffix,
    },
};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use assert_into::AssertInto;
use log::*;
use thiserror::Error;
use zerocopy::{
    IntoBytes,
    byteorder::little_endian::{U16, U32},
};

pub mod crc32;
pub mod dfuse;
pub mod image;
pub mod target;
pub mod writer;

pub use image::Image;
pub use target::Target;
pub use writer::{BinWriter, HexWriter, TargetWriter};

#[derive(Error, Debug)]
pub enum DfuseError {
    #[error("Bad {record} signature at offset {offset:#x}: expected {expected:02x?}, found {found:02x?}")]
    BadSignature {
        record: &'static str,
        offset: usize,
        expected: &'static [u8],
        found: Vec<u8>,
    },
    #[error("Truncated {record} at offset {offset:#x}: needs {needed} bytes, {available} left")]
    Truncated {
        record: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("Input of {0} bytes does not fit into a 32-bit size field")]
    OversizedInput(u64),
    #[error("A DfuSe file can hold at most {} images", u8::MAX)]
    TooManyImages,
    #[error("CRC mismatch: file says {stored:#010x}, contents give {computed:#010x}")]
    CrcMismatch { stored: u32, computed: u32 },
    #[error("Element {index} does not exist, the image has {count}")]
    ElementOutOfRange { index: usize, count: usize },
    #[error("Failed to read or write file")]
    Io(#[from] std::io::Error),
}

/// An in-memory DfuSe file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfuseFile {
    format_version: u8,
    file_size: u32,
    images: Vec<Image>,
    device_version: u16,
    product_id: u16,
    vendor_id: u16,
    dfu_format_version: u16,
    crc: u32,
}

impl DfuseFile {
    /// Creates an empty file for the given device.
    pub fn new(vendor_id: u16, product_id: u16, device_version: u16) -> Self {
        let mut file = Self {
            format_version: DFUSE_VERSION,
            file_size: FILE_PREFIX_SIZE as u32,
            images: Vec::new(),
            device_version,
            product_id,
            vendor_id,
            dfu_format_version: DFU_FORMAT_DFUSE,
            crc: 0,
        };
        file.crc = file
            .compute_crc()
            .expect("A file without images always fits its size fields");
        file
    }

    /// Appends `image` and updates the size and CRC fields.
    ///
    /// Images without targets are skipped. The CRC is recomputed over the
    /// whole file on every call, so adding many images is quadratic in the
    /// file size. On error the file is left unchanged.
    pub fn add_image(&mut self, image: Image) -> Result<(), DfuseError> {
        if !image.is_valid() {
            warn!(
                "Skipping image for alt setting {} since it has no targets",
                image.alt_setting()
            );
            return Ok(());
        }

        if self.images.len() >= u8::MAX as usize {
            return Err(DfuseError::TooManyImages);
        }

        let file_size = self.file_size as u64 + image.encoded_len();
        let file_size =
            u32::try_from(file_size).map_err(|_| DfuseError::OversizedInput(file_size))?;

        debug!(
            "Adding image for alt setting {} ({} bytes)",
            image.alt_setting(),
            image.encoded_len()
        );

        let previous_size = self.file_size;
        self.images.push(image);
        self.file_size = file_size;

        match self.compute_crc() {
            Ok(crc) => {
                self.crc = crc;
                Ok(())
            }
            Err(err) => {
                self.images.pop();
                self.file_size = previous_size;
                Err(err)
            }
        }
    }

    /// Parses a file and checks its suffix signature and CRC.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DfuseError> {
        let (file, suffix_offset) = Self::parse(bytes)?;

        let signature = &bytes[suffix_offset + 8..suffix_offset + 11];
        if signature != DFU_SUFFIX_SIGNATURE {
            return Err(DfuseError::BadSignature {
                record: "suffix",
                offset: suffix_offset + 8,
                expected: &DFU_SUFFIX_SIGNATURE,
                found: signature.to_vec(),
            });
        }

        let crc_offset = suffix_offset + FILE_SUFFIX_SIZE - CRC_SIZE;
        let computed = crc32::crc32(&bytes[..crc_offset]);
        if computed != file.crc {
            return Err(DfuseError::CrcMismatch {
                stored: file.crc,
                computed,
            });
        }

        Ok(file)
    }

    /// Parses a file without looking at the suffix signature or CRC.
    ///
    /// Anything after the suffix is ignored.
    pub fn from_bytes_unverified(bytes: &[u8]) -> Result<Self, DfuseError> {
        Self::parse(bytes).map(|(file, _)| file)
    }

    /// Returns the parsed file and the offset of its suffix.
    fn parse(bytes: &[u8]) -> Result<(Self, usize), DfuseError> {
        let mut reader = ByteReader::new(bytes);

        let prefix: FilePrefix = reader.read("file prefix")?;
        if prefix.signature != DFUSE_SIGNATURE {
            return Err(DfuseError::BadSignature {
                record: "file prefix",
                offset: 0,
                expected: &DFUSE_SIGNATURE,
                found: prefix.signature.to_vec(),
            });
        }

        debug!(
            "DfuSe v{}, {} bytes, {} image(s)",
            prefix.version,
            prefix.file_size.get(),
            prefix.image_count
        );

        let mut images = Vec::with_capacity(prefix.image_count as usize);
        for _ in 0..prefix.image_count {
            images.push(Image::read(&mut reader)?);
        }

        let file_size = FILE_PREFIX_SIZE as u64
            + images.iter().map(Image::encoded_len).sum::<u64>();
        let file_size =
            u32::try_from(file_size).map_err(|_| DfuseError::OversizedInput(file_size))?;

        if file_size != prefix.file_size.get() {
            warn!(
                "Prefix declares a {} byte file but images end at {}",
                prefix.file_size.get(),
                file_size
            );
        }

        let suffix_offset = reader.offset();
        let suffix: FileSuffix = reader.read("suffix")?;
        let crc: U32 = reader.read("crc")?;

        if reader.remaining() > 0 {
            warn!("Ignoring {} bytes after the suffix", reader.remaining());
        }

        let file = Self {
            format_version: prefix.version,
            file_size,
            images,
            device_version: suffix.device_version.get(),
            product_id: suffix.product_id.get(),
            vendor_id: suffix.vendor_id.get(),
            dfu_format_version: suffix.dfu_format.get(),
            crc: crc.get(),
        };

        Ok((file, suffix_offset))
    }

    /// Reads `input` to the end and parses it with [`DfuseFile::from_bytes`].
    pub fn read_from(mut input: impl Read) -> Result<Self, DfuseError> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DfuseError> {
        let input = BufReader::new(File::open(path.as_ref())?);
        Self::read_from(input)
    }

    /// Everything covered by the CRC: prefix, images and the suffix minus
    /// the CRC field.
    fn write_body(&self, mut output: impl Write) -> Result<(), DfuseError> {
        let prefix = FilePrefix {
            signature: DFUSE_SIGNATURE,
            version: self.format_version,
            file_size: U32::new(self.file_size),
            image_count: self.images.len().assert_into(),
        };
        output.write_all(prefix.as_bytes())?;

        for image in &self.images {
            image.write_to(&mut output)?;
        }

        let suffix = FileSuffix {
            device_version: U16::new(self.device_version),
            product_id: U16::new(self.product_id),
            vendor_id: U16::new(self.vendor_id),
            dfu_format: U16::new(self.dfu_format_version),
            signature: DFU_SUFFIX_SIGNATURE,
            length: FILE_SUFFIX_SIZE as u8,
        };
        output.write_all(suffix.as_bytes())?;

        Ok(())
    }

    fn compute_crc(&self) -> Result<u32, DfuseError> {
        let mut crc = Crc32::new();
        self.write_body(&mut crc)?;
        Ok(crc.finalize())
    }

    /// Serializes the file. The CRC is taken over the bytes actually written,
    /// so a parsed file with non canonical header fields comes out valid.
    pub fn write_to(&self, output: impl Write) -> Result<(), DfuseError> {
        let mut output = Checksummed::new(output);
        self.write_body(&mut output)?;
        let (mut output, crc) = output.into_parts();
        output.write_all(&crc.finalize().to_le_bytes())?;
        output.flush()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DfuseError> {
        let mut bytes = Vec::with_capacity(self.encoded_len() as usize);
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Writes the file to `path` through a temporary file in the same
    /// directory, so `path` either keeps its old contents or gets the
    /// complete new file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DfuseError> {
        self.save_with(path, |output| Ok(output))
    }

    /// Like [`DfuseFile::save`], but lets the caller wrap the output stream,
    /// e.g. to report progress.
    pub fn save_with<P, W, F>(&self, path: P, wrap: F) -> Result<(), DfuseError>
    where
        P: AsRef<Path>,
        W: Write,
        F: FnOnce(BufWriter<File>) -> Result<W, DfuseError>,
    {
        let path = path.as_ref();
        let tmp_path = temporary_path(path);

        let result = File::create(&tmp_path)
            .map_err(DfuseError::from)
            .and_then(|file| {
                let output = wrap(BufWriter::new(file.try_clone()?))?;
                self.write_to(output)?;
                file.sync_all()?;
                Ok(())
            })
            .and_then(|()| fs::rename(&tmp_path, path).map_err(DfuseError::from));

        if let Err(err) = result {
            fs::remove_file(&tmp_path).ok();
            return Err(err);
        }

        info!("Wrote {} bytes to {}", self.encoded_len(), path.display());

        Ok(())
    }

    pub fn format_version(&self) -> u8 {
        self.format_version
    }

    /// Value of the prefix's size field: the file size without the suffix.
    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    /// Size of the whole file once written, suffix included.
    pub fn encoded_len(&self) -> u64 {
        FILE_PREFIX_SIZE as u64
            + self.images.iter().map(Image::encoded_len).sum::<u64>()
            + FILE_SUFFIX_SIZE as u64
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn device_version(&self) -> u16 {
        self.device_version
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn dfu_format_version(&self) -> u16 {
        self.dfu_format_version
    }

    /// CRC stored in the suffix of a parsed file, or the CRC of the current
    /// contents for a file built in memory.
    pub fn crc(&self) -> u32 {
        self.crc
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
