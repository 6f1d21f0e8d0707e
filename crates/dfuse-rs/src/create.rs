use std::path::{Path, PathBuf};

use dfuse_core::{DfuseFile, Image, Target};
use log::{LevelFilter, info};

use crate::{parse_u32, reporter::ProgressBarReporter};

/// One `ADDRESS:FILE` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSpec {
    pub address: u32,
    pub path: PathBuf,
}

impl ElementSpec {
    pub fn parse(s: &str) -> Result<Self, String> {
        let (address, path) = s
            .split_once(':')
            .ok_or_else(|| format!("Expected ADDRESS:FILE, got '{}'", s))?;

        if path.is_empty() {
            return Err(format!("Missing file name in '{}'", s));
        }

        Ok(Self {
            address: parse_u32(address)?,
            path: PathBuf::from(path),
        })
    }
}

pub fn create<P: AsRef<Path>>(
    output_path: &P,
    elements: &[ElementSpec],
    (vendor, product, device): (u16, u16, u16),
    alt_setting: u8,
    name: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let output_path = output_path.as_ref();

    let mut image = Image::new(alt_setting, name);
    for element in elements {
        let target = Target::from_file(element.address, &element.path)?;
        info!(
            "Element {:#010x} <- {} ({} bytes)",
            target.address(),
            element.path.display(),
            target.size()
        );
        image.add_target(target);
    }

    let mut file = DfuseFile::new(vendor, product, device);
    file.add_image(image)?;

    info!(
        "Vendor {:#06x} Product {:#06x} Device {:#06x}, CRC {:#010x}",
        vendor,
        product,
        device,
        file.crc()
    );

    let should_print_progress = log::max_level() >= LevelFilter::Info;

    if should_print_progress {
        let len = file.encoded_len();
        file.save_with(output_path, |output| Ok(ProgressBarReporter::new(len, output)))?;
        println!();
    } else {
        file.save(output_path)?;
    }

    Ok(())
}
