use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::*;

use std::io::Write;

use crate::{
    create::{ElementSpec, create},
    extract::{OutputFormat, extract},
    info::info,
};

mod create;
mod extract;
mod info;
mod reporter;

#[derive(Parser, Debug)]
enum Command {
    /// Print the vendor, product and images of a DfuSe file
    #[command(arg_required_else_help = true)]
    Info {
        /// Input DfuSe file
        input: String,

        /// Skip the CRC and suffix signature checks
        #[clap(long)]
        no_verify: bool,
    },
    /// Write one element of an image to its own file
    #[command(arg_required_else_help = true)]
    Extract {
        /// Input DfuSe file
        input: String,

        /// Output file
        output: String,

        /// Index of the image in the file
        #[clap(short, long, default_value_t = 0)]
        image: usize,

        /// Index of the element in the image
        #[clap(short, long, default_value_t = 0)]
        element: usize,

        /// Encoding of the output file
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Bin)]
        format: OutputFormat,
    },
    /// Build a single image DfuSe file from raw binaries
    #[command(arg_required_else_help = true)]
    Create {
        /// Output DfuSe file
        output: String,

        /// Elements as ADDRESS:FILE, e.g. 0x08000000:app.bin
        #[clap(required = true, value_parser = ElementSpec::parse)]
        elements: Vec<ElementSpec>,

        /// USB vendor id
        #[clap(long, value_parser = parse_u16, default_value = "0x0483")]
        vendor: u16,

        /// USB product id
        #[clap(long, value_parser = parse_u16, default_value = "0xdf11")]
        product: u16,

        /// Device (firmware) version
        #[clap(long, value_parser = parse_u16, default_value = "0xffff")]
        device: u16,

        /// Alternate setting the image is flashed through
        #[clap(short, long, default_value_t = 0)]
        alt: u8,

        /// Image name
        #[clap(short, long)]
        name: Option<String>,
    },
}

/// Accepts decimal or 0x prefixed hexadecimal.
pub(crate) fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|err| format!("Invalid number '{}': {}", s, err))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let value = parse_u32(s)?;
    u16::try_from(value).map_err(|_| format!("'{}' does not fit into 16 bits", s))
}

#[derive(Parser, Debug, Default)]
#[clap(version, about, long_about = None, author = "Jonathan Nilsson")]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Set the logging verbosity
    #[clap(short, long, value_enum, global = true, default_value_t = LogLevel::Info)]
    verbose: LogLevel,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Off => LevelFilter::Off,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default())
        .filter_level(cli.verbose.into())
        .target(env_logger::Target::Stdout)
        .format(|buf, record| {
            let level = record.level();
            if level == Level::Info {
                writeln!(buf, "{}", record.args())
            } else {
                writeln!(buf, "{}: {}", record.level(), record.args())
            }
        })
        .init();

    let command = match cli.command {
        Some(command) => command,
        None => return Ok(()),
    };

    match command {
        Command::Info { input, no_verify } => info(&input, !no_verify),
        Command::Extract {
            input,
            output,
            image,
            element,
            format,
        } => extract(&input, &output, image, element, format),
        Command::Create {
            output,
            elements,
            vendor,
            product,
            device,
            alt,
            name,
        } => create(
            &output,
            &elements,
            (vendor, product, device),
            alt,
            name.as_deref(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers() {
        assert_eq!(parse_u32("0x08000000"), Ok(0x0800_0000));
        assert_eq!(parse_u32("0XFF"), Ok(0xFF));
        assert_eq!(parse_u32("1024"), Ok(1024));
        assert!(parse_u32("0xZZ").is_err());
        assert!(parse_u32("").is_err());

        assert_eq!(parse_u16("0x0483"), Ok(0x0483));
        assert!(parse_u16("0x10000").is_err());
    }

    #[test]
    fn cli() {
        let cli = Cli::try_parse_from([
            "dfuse-rs",
            "create",
            "out.dfu",
            "0x08000000:app.bin",
            "--vendor",
            "0x1234",
            "--name",
            "App",
        ])
        .unwrap();

        match cli.command {
            Some(Command::Create {
                elements,
                vendor,
                product,
                name,
                ..
            }) => {
                assert_eq!(elements.len(), 1);
                assert_eq!(elements[0].address, 0x0800_0000);
                assert_eq!(vendor, 0x1234);
                assert_eq!(product, 0xDF11);
                assert_eq!(name.as_deref(), Some("App"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
