use std::path::Path;

use clap::ValueEnum;
use dfuse_core::{BinWriter, DfuseFile, HexWriter, TargetWriter};
use log::info;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Raw binary
    Bin,
    /// Intel HEX
    Hex,
}

impl OutputFormat {
    fn writer(self) -> &'static dyn TargetWriter {
        match self {
            OutputFormat::Bin => &BinWriter,
            OutputFormat::Hex => &HexWriter,
        }
    }
}

pub fn extract<P1: AsRef<Path>, P2: AsRef<Path>>(
    input_path: &P1,
    output_path: &P2,
    image_index: usize,
    element_index: usize,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let output_path = output_path.as_ref();
    let file = DfuseFile::open(input_path)?;

    let image = file.images().get(image_index).ok_or_else(|| {
        format!(
            "Image {} does not exist, the file has {}",
            image_index,
            file.images().len()
        )
    })?;

    image.write_element(output_path, element_index, format.writer())?;

    let target = &image.targets()[element_index];
    info!(
        "Wrote element {:#010x} ({} bytes) of image {} to {}",
        target.address(),
        target.size(),
        image.alt_setting(),
        output_path.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfuse_core::{Image, Target};
    use std::fs;

    #[test]
    fn bin_and_hex() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path();

        let mut image = Image::new(0, Some("App"));
        image.add_target(Target::new(0x0800_0000, vec![0xDE, 0xAD, 0xBE, 0xEF]).unwrap());
        let mut file = DfuseFile::new(0x1234, 0x5678, 0x0100);
        file.add_image(image).unwrap();

        let input = dir.join("app.dfu");
        file.save(&input).unwrap();

        let bin = dir.join("app.bin");
        extract(&input, &bin, 0, 0, OutputFormat::Bin).unwrap();
        assert_eq!(fs::read(&bin).unwrap(), [0xDE, 0xAD, 0xBE, 0xEF]);

        let hex = dir.join("app.hex");
        extract(&input, &hex, 0, 0, OutputFormat::Hex).unwrap();
        assert!(
            fs::read_to_string(&hex)
                .unwrap()
                .contains(":04000000DEADBEEFC4")
        );

        assert!(extract(&input, &bin, 1, 0, OutputFormat::Bin).is_err());
        assert!(extract(&input, &bin, 0, 1, OutputFormat::Bin).is_err());
    }
}
