use jx1000_device::SessionConfig;

use crate::cmd::read::MemoryReport;
use crate::cmd::{open_session, parse_timeout, Connection, WriteArgs};
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_report, OutputFormat};

pub fn run(args: WriteArgs, conn: &Connection, format: OutputFormat) -> CliResult<i32> {
    let config = SessionConfig {
        write_timeout: parse_timeout(&args.timeout)?,
        ..SessionConfig::default()
    };
    let device = open_session(conn, config)?;

    device
        .session
        .write_memory(args.board, args.channel, args.addr, args.value)
        .map_err(|err| device_error("write failed", err))?;

    print_report(
        &MemoryReport {
            board: args.board,
            channel: args.channel,
            addr: args.addr,
            value: args.value,
        },
        format,
    );
    Ok(SUCCESS)
}
