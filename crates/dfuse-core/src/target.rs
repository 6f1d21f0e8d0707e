use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
};

use log::debug;
use zerocopy::{IntoBytes, byteorder::little_endian::U32};

use crate::{
    DfuseError,
    dfuse::{ByteReader, ELEMENT_PREFIX_SIZE, ElementPrefix},
};

/// One contiguous block of memory, called an "element" in UM0391.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    address: u32,
    data: Vec<u8>,
}

impl Target {
    /// Fails if `data` is too large for the 32-bit size field.
    pub fn new(address: u32, data: Vec<u8>) -> Result<Self, DfuseError> {
        if u32::try_from(data.len()).is_err() {
            return Err(DfuseError::OversizedInput(data.len() as u64));
        }
        Ok(Self { address, data })
    }

    /// A target of `size` bytes all set to `fill`, e.g. 0xFF for erased flash.
    pub fn filled(address: u32, fill: u8, size: u32) -> Self {
        Self {
            address,
            data: vec![fill; size as usize],
        }
    }

    /// Loads the whole file at `path` as the target's payload.
    pub fn from_file<P: AsRef<Path>>(address: u32, path: P) -> Result<Self, DfuseError> {
        let path = path.as_ref();
        let mut file = File::open(path)?;

        let len = file.metadata()?.len();
        if u32::try_from(len).is_err() {
            return Err(DfuseError::OversizedInput(len));
        }

        let mut data = Vec::with_capacity(len as usize);
        file.read_to_end(&mut data)?;

        debug!(
            "Loaded {} bytes for {:#010x} from {}",
            data.len(),
            address,
            path.display()
        );

        Self::new(address, data)
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn size(&self) -> u32 {
        // Bounded by the constructors.
        self.data.len() as u32
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes this target takes up in a file, prefix included.
    pub fn encoded_len(&self) -> u64 {
        ELEMENT_PREFIX_SIZE as u64 + self.data.len() as u64
    }

    pub(crate) fn read(reader: &mut ByteReader) -> Result<Self, DfuseError> {
        let prefix: ElementPrefix = reader.read("element prefix")?;
        let address = prefix.address.get();
        let size = prefix.size.get();

        let data = reader.take(size as usize, "element data")?;

        debug!("Element {:#010x} ({} bytes)", address, size);

        Ok(Self {
            address,
            data: data.to_vec(),
        })
    }

    pub fn write_to(&self, mut output: impl Write) -> Result<(), DfuseError> {
        let prefix = ElementPrefix {
            address: U32::new(self.address),
            size: U32::new(self.size()),
        };

        output.write_all(prefix.as_bytes())?;
        output.write_all(&self.data)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn encode() {
        let target = Target::new(0x0800_0000, vec![0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        let mut out = Vec::new();
        target.write_to(&mut out).unwrap();

        assert_eq!(
            out,
            [0x00, 0x00, 0x00, 0x08, 0x04, 0x00, 0x00, 0x00, 0xDE, 0xAD, 0xBE, 0xEF]
        );
        assert_eq!(target.encoded_len(), out.len() as u64);
    }

    #[test]
    fn decode() {
        let bytes = [
            0x00, 0x40, 0x00, 0x08, 0x03, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0xAA,
        ];
        let mut reader = ByteReader::new(&bytes);
        let target = Target::read(&mut reader).unwrap();

        assert_eq!(target.address(), 0x0800_4000);
        assert_eq!(target.size(), 3);
        assert_eq!(target.data(), &[1, 2, 3]);
        assert_eq!(reader.remaining(), 1);
    }

    #[test]
    fn declared_size_past_end_is_truncated() {
        let bytes = [0x00, 0x00, 0x00, 0x08, 0x10, 0x00, 0x00, 0x00, 0x01, 0x02];
        let mut reader = ByteReader::new(&bytes);

        match Target::read(&mut reader) {
            Err(DfuseError::Truncated {
                needed, available, ..
            }) => {
                assert_eq!(needed, 16);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn short_prefix_is_truncated() {
        let mut reader = ByteReader::new(&[0x00, 0x00, 0x00]);
        assert!(matches!(
            Target::read(&mut reader),
            Err(DfuseError::Truncated { .. })
        ));
    }

    #[test]
    fn filled() {
        let target = Target::filled(0x2000_0000, 0xFF, 5);
        assert_eq!(target.size(), 5);
        assert!(target.data().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn empty_payload() {
        let target = Target::new(0x1000, Vec::new()).unwrap();
        let mut out = Vec::new();
        target.write_to(&mut out).unwrap();
        assert_eq!(out.len(), ELEMENT_PREFIX_SIZE);

        let mut reader = ByteReader::new(&out);
        assert_eq!(Target::read(&mut reader).unwrap(), target);
    }

    #[test]
    fn from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"firmware bytes").unwrap();
        file.flush().unwrap();

        let target = Target::from_file(0x0801_0000, file.path()).unwrap();
        assert_eq!(target.address(), 0x0801_0000);
        assert_eq!(target.data(), b"firmware bytes");
    }

    #[test]
    fn from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Target::from_file(0, dir.path().join("missing.bin")),
            Err(DfuseError::Io(_))
        ));
    }
}
