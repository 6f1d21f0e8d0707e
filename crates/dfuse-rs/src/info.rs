use std::{fs, path::Path};

use dfuse_core::DfuseFile;
use log::{info, warn};

pub fn info<P: AsRef<Path>>(
    input_path: &P,
    verify: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let input_path = input_path.as_ref();

    let file = if verify {
        DfuseFile::open(input_path)?
    } else {
        warn!("Not checking the CRC of {}", input_path.display());
        DfuseFile::from_bytes_unverified(&fs::read(input_path)?)?
    };

    info!("{}", input_path.display());

    for line in describe(&file) {
        println!("{}", line);
    }

    Ok(())
}

fn describe(file: &DfuseFile) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Vendor: {:#06x} Product: {:#06x} Device Version: {:#06x}",
            file.vendor_id(),
            file.product_id(),
            file.device_version()
        ),
        format!(
            "DfuSe v{}, DFU {:#06x}, CRC {:#010x}",
            file.format_version(),
            file.dfu_format_version(),
            file.crc()
        ),
        format!("Number of Images: {}", file.images().len()),
    ];

    for image in file.images() {
        lines.push(format!(
            "\tId: {} Name: {} Size: {} consisting of {} element(s).",
            image.alt_setting(),
            image.name().unwrap_or("<unnamed>"),
            image.element_size(),
            image.element_count()
        ));
        for target in image.targets() {
            lines.push(format!(
                "\t\tElement Address: {:#010x} Size: {}",
                target.address(),
                target.size()
            ));
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfuse_core::{Image, Target};

    #[test]
    fn listing() {
        let mut image = Image::new(0, Some("App"));
        image.add_target(Target::new(0x0800_0000, vec![0xDE, 0xAD, 0xBE, 0xEF]).unwrap());

        let mut file = DfuseFile::new(0x1234, 0x5678, 0x0100);
        file.add_image(image).unwrap();

        assert_eq!(
            describe(&file),
            [
                "Vendor: 0x1234 Product: 0x5678 Device Version: 0x0100",
                "DfuSe v1, DFU 0x011a, CRC 0x100f4aa2",
                "Number of Images: 1",
                "\tId: 0 Name: App Size: 12 consisting of 1 element(s).",
                "\t\tElement Address: 0x08000000 Size: 4",
            ]
        );
    }
}
