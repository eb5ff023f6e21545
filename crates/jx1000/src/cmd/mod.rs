use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use clap::{Args, Subcommand};
use jx1000_device::{Event, Session, SessionConfig, SimConfig, SimulatedDevice};

use crate::exit::{device_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod download;
pub mod info;
pub mod modbus;
pub mod monitor;
pub mod read;
pub mod start;
pub mod stop;
pub mod version;
pub mod write;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Query device identification.
    Info(InfoArgs),
    /// Read one value from board memory.
    Read(ReadArgs),
    /// Write one value to board memory.
    Write(WriteArgs),
    /// Upload a rules file.
    Download(DownloadArgs),
    /// Start the loaded test and wait for its verdict.
    Start(StartArgs),
    /// Stop the running test.
    Stop(StopArgs),
    /// Print device events until interrupted.
    Monitor(MonitorArgs),
    /// Talk to the companion Modbus I/O module.
    #[command(subcommand)]
    Modbus(ModbusCommand),
    /// Show version information.
    Version(VersionArgs),
}

/// Where the instrument is attached.
#[derive(Debug, Clone)]
pub struct Connection {
    pub port: Option<String>,
    pub baud: u32,
    pub simulate: bool,
}

pub fn run(command: Command, conn: &Connection, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Info(args) => info::run(args, conn, format),
        Command::Read(args) => read::run(args, conn, format),
        Command::Write(args) => write::run(args, conn, format),
        Command::Download(args) => download::run(args, conn, format),
        Command::Start(args) => start::run(args, conn, format),
        Command::Stop(args) => stop::run(args, conn, format),
        Command::Monitor(args) => monitor::run(args, conn, format),
        Command::Modbus(command) => modbus::run(command, conn, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// How long to wait for the answer (e.g. 2s, 300ms).
    #[arg(long, default_value = "1s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Board number.
    #[arg(long, short = 'b')]
    pub board: u8,
    /// Channel on the board.
    #[arg(long, short = 'c')]
    pub channel: u8,
    /// Memory address.
    #[arg(long, short = 'a')]
    pub addr: u16,
    /// How long to wait for the response.
    #[arg(long, default_value = "300ms")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    /// Board number.
    #[arg(long, short = 'b')]
    pub board: u8,
    /// Channel on the board.
    #[arg(long, short = 'c')]
    pub channel: u8,
    /// Memory address.
    #[arg(long, short = 'a')]
    pub addr: u16,
    /// Value to store.
    #[arg(long, short = 'v', allow_negative_numbers = true)]
    pub value: f32,
    /// How long to wait for the acknowledgment.
    #[arg(long, default_value = "300ms")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Rules file to upload.
    pub file: PathBuf,
    /// Wait for each chunk acknowledgment.
    #[arg(long, default_value = "2s")]
    pub chunk_timeout: String,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// How long to wait for the verdict.
    #[arg(long, default_value = "10s")]
    pub timeout: String,
    /// Send the start command and exit.
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Keep printing device output this long after stopping.
    #[arg(long, default_value = "200ms")]
    pub linger: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Only print events for these commands (comma-separated, e.g. LOG,RES).
    #[arg(long, value_delimiter = ',')]
    pub commands: Option<Vec<String>>,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum ModbusCommand {
    /// Read consecutive holding registers.
    Read(ModbusReadArgs),
    /// Write one holding register.
    Write(ModbusWriteArgs),
    /// Read mapped voltage pairs (inputs 1000-1499).
    Mapped(ModbusMappedArgs),
    /// Trigger a module test and print its outcome.
    Test(ModbusTestArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ModbusLink {
    /// Serial port of the I/O module.
    #[arg(long, env = "JX1000_MODBUS_PORT")]
    pub modbus_port: Option<String>,
    /// Line rate of the I/O module.
    #[arg(long, default_value = "9600")]
    pub modbus_baud: u32,
    /// Slave address.
    #[arg(long, default_value = "1")]
    pub slave: u8,
}

#[derive(Args, Debug)]
pub struct ModbusReadArgs {
    #[command(flatten)]
    pub link: ModbusLink,
    /// First register.
    pub start: u16,
    /// Number of registers.
    #[arg(long, short = 'n', default_value = "1")]
    pub count: u16,
}

#[derive(Args, Debug)]
pub struct ModbusWriteArgs {
    #[command(flatten)]
    pub link: ModbusLink,
    /// Register address. Output registers 120 and 130 switch their pair.
    pub addr: u16,
    /// Value to write.
    pub value: u16,
}

#[derive(Args, Debug)]
pub struct ModbusMappedArgs {
    #[command(flatten)]
    pub link: ModbusLink,
    /// First mapped input (1000-1499).
    pub start: u16,
    /// Number of inputs.
    #[arg(long, short = 'n', default_value = "1")]
    pub count: u16,
    /// Word order of the float pairs: big or little.
    #[arg(long, default_value = "big")]
    pub word_order: String,
}

#[derive(Args, Debug)]
pub struct ModbusTestArgs {
    #[command(flatten)]
    pub link: ModbusLink,
    /// Pause between the trigger write and the result read.
    #[arg(long, default_value = "1ms")]
    pub settle: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// An open session, with the simulator behind it when `--simulate` is set.
pub struct Device {
    pub session: Session,
    _sim: Option<SimulatedDevice>,
}

pub fn open_session(conn: &Connection, mut config: SessionConfig) -> CliResult<Device> {
    if conn.simulate {
        let (host, sim) = SimulatedDevice::pair(SimConfig::default())
            .map_err(|err| device_error("simulator failed", err))?;
        let session = Session::with_config("simulator", config);
        session
            .open_stream(host)
            .map_err(|err| device_error("open failed", err))?;
        return Ok(Device {
            session,
            _sim: Some(sim),
        });
    }

    let port = conn.port.as_deref().ok_or_else(|| {
        CliError::new(
            USAGE,
            "no serial port given (use --port, JX1000_PORT or --simulate)",
        )
    })?;
    config.serial.baud_rate = conn.baud;
    let session = Session::with_config(port, config);
    session
        .open()
        .map_err(|err| device_error("open failed", err))?;
    Ok(Device { session, _sim: None })
}

/// Forward every event of `session` to a channel.
pub fn event_stream(session: &Session) -> Receiver<Event> {
    let (tx, rx) = mpsc::channel();
    session.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timeout_seconds() {
        assert_eq!(parse_timeout("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn parse_timeout_millis() {
        assert_eq!(parse_timeout("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_timeout_invalid() {
        assert_eq!(parse_timeout("0s").unwrap_err().code, USAGE);
        assert!(parse_timeout("bad").is_err());
        assert!(parse_timeout("").is_err());
    }

    #[test]
    fn port_required_without_simulator() {
        let conn = Connection {
            port: None,
            baud: 115_200,
            simulate: false,
        };
        let err = open_session(&conn, SessionConfig::default())
            .err()
            .expect("missing port should fail");
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn simulated_session_opens() {
        let conn = Connection {
            port: None,
            baud: 115_200,
            simulate: true,
        };
        let device = open_session(&conn, SessionConfig::default()).expect("simulator");
        assert!(device.session.is_open());
        assert_eq!(device.session.port_name(), "simulator");
    }
}
