use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use log::{debug, warn};
use zerocopy::{IntoBytes, byteorder::little_endian::U32};

use crate::{
    DfuseError,
    dfuse::{
        ByteReader, IMAGE_PREFIX_SIZE, ImagePrefix, TARGET_NAME_MAX, TARGET_SIGNATURE,
        decode_name, encode_name,
    },
    target::Target,
    writer::TargetWriter,
};

/// A firmware image for one alternate setting of the device, made up of one
/// or more targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    alt_setting: u8,
    name: Option<String>,
    targets: Vec<Target>,
}

impl Image {
    /// Creates an image without targets. Names longer than 254 bytes are
    /// truncated when the image is written.
    pub fn new(alt_setting: u8, name: Option<&str>) -> Self {
        if let Some(name) = name {
            if name.len() > TARGET_NAME_MAX {
                warn!(
                    "Image name is {} bytes, only the first {} are stored",
                    name.len(),
                    TARGET_NAME_MAX
                );
            }
        }

        Self {
            alt_setting,
            name: name.map(str::to_owned),
            targets: Vec::new(),
        }
    }

    pub fn add_target(&mut self, target: Target) {
        self.targets.push(target);
    }

    pub fn alt_setting(&self) -> u8 {
        self.alt_setting
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// An image is only worth writing once it holds at least one target.
    pub fn is_valid(&self) -> bool {
        !self.targets.is_empty()
    }

    pub fn element_count(&self) -> usize {
        self.targets.len()
    }

    /// Size of all targets including their 8 byte prefixes, the value stored
    /// in the image prefix.
    pub fn element_size(&self) -> u64 {
        self.targets.iter().map(Target::encoded_len).sum()
    }

    /// Bytes this image takes up in a file, prefix included.
    pub fn encoded_len(&self) -> u64 {
        IMAGE_PREFIX_SIZE as u64 + self.element_size()
    }

    pub(crate) fn read(reader: &mut ByteReader) -> Result<Self, DfuseError> {
        let offset = reader.offset();
        let prefix: ImagePrefix = reader.read("image prefix")?;

        if prefix.signature != TARGET_SIGNATURE {
            return Err(DfuseError::BadSignature {
                record: "image prefix",
                offset,
                expected: &TARGET_SIGNATURE,
                found: prefix.signature.to_vec(),
            });
        }

        let name = if prefix.named.get() != 0 {
            Some(decode_name(&prefix.name))
        } else {
            None
        };

        let element_count = prefix.element_count.get();

        debug!(
            "Image alt {} {:?} with {} element(s)",
            prefix.alt_setting, name, element_count
        );

        // The count comes from the file, don't trust it for preallocation.
        let mut targets = Vec::new();
        for _ in 0..element_count {
            targets.push(Target::read(reader)?);
        }

        let image = Self {
            alt_setting: prefix.alt_setting,
            name,
            targets,
        };

        if image.element_size() != prefix.element_size.get() as u64 {
            warn!(
                "Image alt {} declares {} bytes of elements but contains {}",
                image.alt_setting,
                prefix.element_size.get(),
                image.element_size()
            );
        }

        Ok(image)
    }

    pub(crate) fn prefix(&self) -> Result<ImagePrefix, DfuseError> {
        let element_size = self.element_size();
        let element_size =
            u32::try_from(element_size).map_err(|_| DfuseError::OversizedInput(element_size))?;
        let element_count = u32::try_from(self.targets.len())
            .map_err(|_| DfuseError::OversizedInput(self.targets.len() as u64))?;

        Ok(ImagePrefix {
            signature: TARGET_SIGNATURE,
            alt_setting: self.alt_setting,
            named: U32::new(self.name.is_some() as u32),
            name: encode_name(self.name.as_deref().unwrap_or_default()),
            element_size: U32::new(element_size),
            element_count: U32::new(element_count),
        })
    }

    pub fn write_to(&self, mut output: impl Write) -> Result<(), DfuseError> {
        let prefix = self.prefix()?;
        output.write_all(prefix.as_bytes())?;

        for target in &self.targets {
            target.write_to(&mut output)?;
        }

        Ok(())
    }

    /// Dumps the target at `index` into the file at `path` using `writer`.
    pub fn write_element<P: AsRef<Path>>(
        &self,
        path: P,
        index: usize,
        writer: &dyn TargetWriter,
    ) -> Result<(), DfuseError> {
        let target = self
            .targets
            .get(index)
            .ok_or(DfuseError::ElementOutOfRange {
                index,
                count: self.targets.len(),
            })?;

        let mut output = BufWriter::new(File::create(path.as_ref())?);
        writer.write_target(target, &mut output)?;
        output.flush()?;

        Ok(())
    }
}
