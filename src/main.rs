use std::{
    fs::File,
    io::{self, BufRead, BufWriter, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use hid_rd_viewer::{dump_report_descriptors, list_devices, DeviceFilter, DeviceInfo};

const PROGRAM_DESC: &str = concat!("USB HID Report Descriptor Viewer ", env!("CARGO_PKG_VERSION"));

#[derive(clap::Parser, Debug)]
#[command(about = PROGRAM_DESC, disable_version_flag = true)]
struct Args {
    /// Show program version information and exit
    #[arg(short, long)]
    version: bool,

    /// Specific device to read
    #[arg(short, long, value_name = "VID:PID")]
    device: Option<DeviceFilter>,

    /// Write report descriptors to the given file instead of stdout
    #[arg(short, long, value_name = "OUTPUT_FILE")]
    output: Option<PathBuf>,
}

/// Answer to the device menu prompt.
#[derive(Debug, PartialEq, Eq)]
enum Selection {
    Quit,
    /// Zero-based index into the menu.
    Device(usize),
    Invalid,
}

impl Selection {
    fn parse(input: &str, count: usize) -> Selection {
        let input = input.trim();
        if input.eq_ignore_ascii_case("q") {
            return Selection::Quit;
        }
        if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
            return Selection::Invalid;
        }
        match input.parse::<usize>() {
            Ok(n) if (1..=count).contains(&n) => Selection::Device(n - 1),
            _ => Selection::Invalid,
        }
    }
}

fn menu_line(index: usize, device: &DeviceInfo) -> String {
    format!(
        "{index}) {} - {} - ID {:04x}:{:04x}",
        device.manufacturer_string().unwrap_or("(unknown)"),
        device.product_string().unwrap_or("(unknown)"),
        device.vendor_id(),
        device.product_id()
    )
}

fn read_report_descriptors(device: &DeviceInfo, output: Option<&Path>) -> anyhow::Result<()> {
    let device = device.open()?;
    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut out = BufWriter::new(file);
            dump_report_descriptors(&device, &mut out)?;
            out.flush()?;
        }
        None => dump_report_descriptors(&device, &mut io::stdout().lock())?,
    }
    Ok(())
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    if args.version {
        println!("{PROGRAM_DESC}");
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(filter) = args.device {
        let device = list_devices()?
            .find(|d| filter.matches(d))
            .ok_or_else(|| anyhow!("Device {filter} not found"))?;
        if !device.is_hid() {
            bail!("Device {filter} has no HID class interface");
        }
        read_report_descriptors(&device, args.output.as_deref())?;
        return Ok(ExitCode::SUCCESS);
    }

    let devices: Vec<DeviceInfo> = list_devices()?.filter(DeviceInfo::is_hid).collect();
    if devices.is_empty() {
        println!("No USB HID Class devices found.");
        return Ok(ExitCode::SUCCESS);
    }

    for (i, device) in devices.iter().enumerate() {
        println!("{}", menu_line(i + 1, device));
    }
    println!("q) Quit program");
    print!("Enter choice: ");
    io::stdout().flush()?;

    let mut choice = String::new();
    io::stdin().lock().read_line(&mut choice)?;

    match Selection::parse(&choice, devices.len()) {
        Selection::Quit => Ok(ExitCode::SUCCESS),
        Selection::Device(i) => {
            read_report_descriptors(&devices[i], args.output.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Selection::Invalid => {
            println!("Invalid selection");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection() {
        assert_eq!(Selection::parse("q\n", 3), Selection::Quit);
        assert_eq!(Selection::parse(" Q ", 3), Selection::Quit);
        assert_eq!(Selection::parse("1\n", 3), Selection::Device(0));
        assert_eq!(Selection::parse("3", 3), Selection::Device(2));
        assert_eq!(Selection::parse("0", 3), Selection::Invalid);
        assert_eq!(Selection::parse("4", 3), Selection::Invalid);
        assert_eq!(Selection::parse("-1", 3), Selection::Invalid);
        assert_eq!(Selection::parse("+1", 3), Selection::Invalid);
        assert_eq!(Selection::parse("1 2", 3), Selection::Invalid);
        assert_eq!(Selection::parse("", 3), Selection::Invalid);
        assert_eq!(Selection::parse("quit", 3), Selection::Invalid);
    }

    #[test]
    fn test_args() {
        let args = Args::try_parse_from(["hid-rd-viewer", "-d", "046d:c52b", "-o", "rd.txt"]).unwrap();
        assert_eq!(
            args.device,
            Some(DeviceFilter {
                vendor_id: 0x046d,
                product_id: 0xc52b
            })
        );
        assert_eq!(args.output.as_deref(), Some(Path::new("rd.txt")));
        assert!(!args.version);

        let args = Args::try_parse_from(["hid-rd-viewer", "--version"]).unwrap();
        assert!(args.version);
        assert!(args.device.is_none());

        let args = Args::try_parse_from(["hid-rd-viewer", "-v"]).unwrap();
        assert!(args.version);

        let err = Args::try_parse_from(["hid-rd-viewer", "--device", "nonsense"]).unwrap_err();
        assert!(err.to_string().contains("Invalid device nonsense"));
    }

    #[test]
    fn test_version_string() {
        assert!(PROGRAM_DESC.starts_with("USB HID Report Descriptor Viewer "));
    }
}
