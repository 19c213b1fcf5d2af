use anyhow::{bail, Result};
use battery_link::{
    BatteryCommand, CommandQueue, DevicePath, LinkError, LinkHandle, MockLink, ProtocolDecoder,
    Record, SerialLink, UsbId, DEFAULT_USB_ID,
};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "battery",
    version,
    about = "Robot battery pack CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// Use the simulated battery instead of USB serial
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    mock: bool,

    /// USB vendor:product of the pack (hex)
    #[arg(long, global = true, default_value_t = DEFAULT_USB_ID.to_string())]
    usb: String,

    #[arg(long, global = true, default_value_t = 9600)]
    baud: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List battery devices found on the bus
    List,
    /// Print decoded records as JSON lines
    Sniff {
        /// Device path; defaults to the first discovered pack
        #[arg(long)]
        device: Option<String>,
        /// Stop after this many records
        #[arg(long, default_value_t = 10u32)]
        count: u32,
        /// Also print raw lines that do not decode
        #[arg(long, action = ArgAction::SetTrue)]
        raw: bool,
    },
    /// Decode lines given on the command line, as if read from the pack
    Decode {
        #[arg(required = true)]
        lines: Vec<String>,
    },
    /// Ask the pack for its device info
    Query {
        #[arg(long)]
        device: Option<String>,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 5u64)]
        wait: u64,
    },
    /// Tell the pack to cut power after a delay
    TurnOff {
        #[arg(long)]
        device: Option<String>,
        /// 0-99
        #[arg(long)]
        seconds: u32,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    if let Commands::Decode { lines } = &cli.command {
        for record in decode_lines(lines) {
            println!("{}", record_json(&record));
        }
        return Ok(());
    }

    if cli.mock {
        let link = MockLink::simulated();
        link.set_idle(Duration::from_millis(200));
        return run(link, cli.command, cli.baud);
    }
    serial_backend(cli)
}

#[cfg(feature = "serial")]
fn serial_backend(cli: Cli) -> Result<()> {
    let usb = UsbId::parse(&cli.usb).ok_or_else(|| anyhow::anyhow!("invalid usb id: {}", cli.usb))?;
    if let Commands::List = cli.command {
        for port in battery_link::list_ports()? {
            let mark = if port.usb == Some(usb) { "*" } else { " " };
            let id = port.usb.map(|u| u.to_string()).unwrap_or_else(|| "-".to_string());
            println!(
                "{mark} {}\t{id}\t{}",
                port.path,
                port.product.as_deref().unwrap_or("")
            );
        }
        return Ok(());
    }
    let link = battery_link::UsbSerialLink::new(usb, Duration::from_millis(1000));
    run(link, cli.command, cli.baud)
}

#[cfg(not(feature = "serial"))]
fn serial_backend(cli: Cli) -> Result<()> {
    if UsbId::parse(&cli.usb).is_none() {
        bail!("invalid usb id: {}", cli.usb);
    }
    bail!("built without the `serial` feature; pass --mock or rebuild with --features serial")
}

fn run<L: SerialLink>(mut link: L, command: Commands, baud: u32) -> Result<()> {
    match command {
        Commands::List => {
            for path in link.discover()? {
                println!("{path}");
            }
            Ok(())
        }
        Commands::Sniff { device, count, raw } => {
            let mut handle = open(&mut link, device, baud)?;
            for line in sniff(&mut handle, count, raw)? {
                println!("{line}");
            }
            handle.close();
            Ok(())
        }
        Commands::Decode { lines } => {
            for record in decode_lines(&lines) {
                println!("{}", record_json(&record));
            }
            Ok(())
        }
        Commands::Query { device, wait } => {
            let mut handle = open(&mut link, device, baud)?;
            let result = query(&mut handle, Duration::from_secs(wait));
            handle.close();
            println!("{}", serde_json::to_string_pretty(&result?)?);
            Ok(())
        }
        Commands::TurnOff { device, seconds } => {
            let command = BatteryCommand::turn_off(seconds)?;
            let mut handle = open(&mut link, device, baud)?;
            let result = send(&mut handle, command);
            handle.close();
            result?;
            println!("sent {command} to {}", handle.path());
            Ok(())
        }
    }
}

fn open<L: SerialLink>(link: &mut L, device: Option<String>, baud: u32) -> Result<L::Handle> {
    let path = match device {
        Some(d) => DevicePath::new(d),
        None => match link.discover()?.into_iter().next() {
            Some(p) => p,
            None => return Err(LinkError::DeviceNotFound("pass --device".into()).into()),
        },
    };
    info!(device = %path, baud, "Opening battery link");
    Ok(link.open(&path, baud)?)
}

fn decode_lines(lines: &[String]) -> Vec<Record> {
    let mut decoder = ProtocolDecoder::new();
    lines
        .iter()
        .flat_map(|l| decoder.push_line(l.as_bytes()))
        .collect()
}

fn record_json(record: &Record) -> Value {
    match record {
        Record::Telemetry(s) => json!({ "telemetry": s }),
        Record::DeviceInfo(i) => json!({ "info": i }),
        Record::Unparseable(text) => json!({ "unparseable": text }),
    }
}

/// Reads until `count` records decoded. Unparseable lines count only when
/// `raw` is set.
fn sniff<H: LinkHandle>(handle: &mut H, count: u32, raw: bool) -> Result<Vec<Value>> {
    let mut decoder = ProtocolDecoder::new();
    let mut out = Vec::new();
    while out.len() < count as usize {
        let line = match handle.read_line() {
            Ok(line) => line,
            Err(LinkError::Timeout) => continue,
            Err(e) => return Err(e.into()),
        };
        for record in decoder.push_line(&line) {
            match record {
                Record::Unparseable(_) if !raw => {}
                record => out.push(record_json(&record)),
            }
        }
    }
    out.truncate(count as usize);
    Ok(out)
}

fn send<H: LinkHandle>(handle: &mut H, command: BatteryCommand) -> Result<()> {
    let queue = CommandQueue::new();
    queue.enqueue(command);
    match queue.drain_into(handle) {
        Some(report) if report.all_failed() => bail!("could not write {command} to the battery"),
        Some(report) if report.any_failed() => {
            warn!(failures = report.failures, "Some writes failed");
            Ok(())
        }
        _ => Ok(()),
    }
}

fn query<H: LinkHandle>(handle: &mut H, wait: Duration) -> Result<Value> {
    send(handle, BatteryCommand::QueryInfo)?;
    let deadline = Instant::now() + wait;
    let mut decoder = ProtocolDecoder::new();
    while Instant::now() < deadline {
        let line = match handle.read_line() {
            Ok(line) => line,
            Err(LinkError::Timeout) => continue,
            Err(e) => return Err(e.into()),
        };
        for record in decoder.push_line(&line) {
            if let Record::DeviceInfo(info) = record {
                return Ok(serde_json::to_value(info)?);
            }
        }
    }
    bail!("no device info within {}s", wait.as_secs())
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
