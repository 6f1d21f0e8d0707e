use std::io::{self, Write};

use assert_into::AssertInto;
use ihex::Record;

use crate::target::Target;

/// Data records are kept short so the output stays readable by picky tools.
const HEX_RECORD_LEN: u64 = 16;

/// Output encoding used when a single target is dumped to its own file.
pub trait TargetWriter {
    fn write_target(&self, target: &Target, output: &mut dyn Write) -> io::Result<()>;
}

/// Raw payload, no address information.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinWriter;

impl TargetWriter for BinWriter {
    fn write_target(&self, target: &Target, output: &mut dyn Write) -> io::Result<()> {
        output.write_all(target.data())
    }
}

/// Intel HEX, using extended linear address records for the upper 16 bits.
#[derive(Debug, Default, Clone, Copy)]
pub struct HexWriter;

impl HexWriter {
    fn records(target: &Target) -> io::Result<Vec<Record>> {
        let start = target.address() as u64;
        if start + target.size() as u64 > 1 << 32 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "target at {:#010x} with {} bytes does not fit in a 32-bit address space",
                    target.address(),
                    target.size()
                ),
            ));
        }

        let mut records = Vec::new();
        let mut upper = None;
        let mut addr = start;
        let mut data = target.data();

        while !data.is_empty() {
            let segment: u16 = (addr >> 16).assert_into();
            if upper != Some(segment) {
                records.push(Record::ExtendedLinearAddress(segment));
                upper = Some(segment);
            }

            let offset: u16 = (addr & 0xFFFF).assert_into();
            let len = (data.len() as u64)
                .min(HEX_RECORD_LEN)
                .min(0x1_0000 - offset as u64) as usize;

            let (chunk, rest) = data.split_at(len);
            records.push(Record::Data {
                offset,
                value: chunk.to_vec(),
            });

            addr += len as u64;
            data = rest;
        }

        records.push(Record::EndOfFile);
        Ok(records)
    }
}

impl TargetWriter for HexWriter {
    fn write_target(&self, target: &Target, output: &mut dyn Write) -> io::Result<()> {
        let records = Self::records(target)?;
        let text = ihex::create_object_file_representation(&records)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        output.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            output.write_all(b"\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(writer: &dyn TargetWriter, target: &Target) -> Vec<u8> {
        let mut out = Vec::new();
        writer.write_target(target, &mut out).unwrap();
        out
    }

    #[test]
    fn bin() {
        let target = Target::new(0x0800_0000, vec![1, 2, 3]).unwrap();
        assert_eq!(render(&BinWriter, &target), [1, 2, 3]);
    }

    #[test]
    fn hex() {
        let target = Target::new(0x0800_0000, vec![0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        let out = String::from_utf8(render(&HexWriter, &target)).unwrap();

        assert_eq!(
            out.lines().collect::<Vec<_>>(),
            [":020000040800F2", ":04000000DEADBEEFC4", ":00000001FF"]
        );
    }

    #[test]
    fn hex_splits_long_data() {
        let target = Target::filled(0x0800_0000, 0xFF, 40);
        let records = HexWriter::records(&target).unwrap();

        let lens: Vec<usize> = records
            .iter()
            .filter_map(|r| match r {
                Record::Data { value, .. } => Some(value.len()),
                _ => None,
            })
            .collect();
        assert_eq!(lens, [16, 16, 8]);
    }

    #[test]
    fn hex_crosses_segment() {
        let target = Target::filled(0x0800_FFF8, 0x00, 16);
        let records = HexWriter::records(&target).unwrap();

        assert_eq!(
            records,
            [
                Record::ExtendedLinearAddress(0x0800),
                Record::Data {
                    offset: 0xFFF8,
                    value: vec![0; 8]
                },
                Record::ExtendedLinearAddress(0x0801),
                Record::Data {
                    offset: 0x0000,
                    value: vec![0; 8]
                },
                Record::EndOfFile,
            ]
        );
    }

    #[test]
    fn hex_rejects_address_overflow() {
        let target = Target::filled(0xFFFF_FFF0, 0x00, 32);
        assert!(HexWriter::records(&target).is_err());
    }
}
