mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::{Command, Connection};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "jx1000", version, about = "JX1000 test instrument CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Serial port of the instrument.
    #[arg(long, short = 'p', env = "JX1000_PORT", global = true)]
    port: Option<String>,

    /// Line rate of the instrument.
    #[arg(long, env = "JX1000_BAUD", default_value = "115200", global = true)]
    baud: u32,

    /// Talk to built-in simulators instead of hardware.
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let conn = Connection {
        port: cli.port,
        baud: cli.baud,
        simulate: cli.simulate,
    };
    let result = cmd::run(cli.command, &conn, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::ModbusCommand;

    #[test]
    fn parses_read_subcommand() {
        let cli = Cli::try_parse_from([
            "jx1000", "--port", "/dev/ttyUSB0", "read", "-b", "1", "-c", "2", "-a", "10",
        ])
        .expect("read args should parse");

        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert!(matches!(cli.command, Command::Read(_)));
    }

    #[test]
    fn write_accepts_negative_values() {
        let cli = Cli::try_parse_from([
            "jx1000", "write", "-b", "1", "-c", "1", "-a", "3", "-v", "-2.5",
        ])
        .expect("write args should parse");

        match cli.command {
            Command::Write(args) => assert_eq!(args.value, -2.5),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_modbus_mapped() {
        let cli = Cli::try_parse_from([
            "jx1000", "--simulate", "modbus", "mapped", "1000", "-n", "4",
        ])
        .expect("modbus args should parse");

        assert!(cli.simulate);
        match cli.command {
            Command::Modbus(ModbusCommand::Mapped(args)) => {
                assert_eq!(args.start, 1000);
                assert_eq!(args.count, 4);
                assert_eq!(args.word_order, "big");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn read_requires_address() {
        let err = Cli::try_parse_from(["jx1000", "read", "-b", "1", "-c", "2"])
            .expect_err("missing addr should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
