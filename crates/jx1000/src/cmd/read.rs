use jx1000_device::SessionConfig;
use serde::Serialize;

use crate::cmd::{open_session, parse_timeout, Connection, ReadArgs};
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_report, OutputFormat, Report};

#[derive(Serialize)]
pub struct MemoryReport {
    pub board: u8,
    pub channel: u8,
    pub addr: u16,
    pub value: f32,
}

impl Report for MemoryReport {
    fn header(&self) -> Vec<&'static str> {
        vec!["BOARD", "CHANNEL", "ADDR", "VALUE"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![
            self.board.to_string(),
            self.channel.to_string(),
            self.addr.to_string(),
            self.value.to_string(),
        ]]
    }

    fn pretty(&self) -> String {
        format!(
            "board={} channel={} addr={} value={}",
            self.board, self.channel, self.addr, self.value
        )
    }

    fn raw(&self) -> String {
        self.value.to_string()
    }
}

pub fn run(args: ReadArgs, conn: &Connection, format: OutputFormat) -> CliResult<i32> {
    let config = SessionConfig {
        read_timeout: parse_timeout(&args.timeout)?,
        ..SessionConfig::default()
    };
    let device = open_session(conn, config)?;

    let value = device
        .session
        .read_memory(args.board, args.channel, args.addr)
        .map_err(|err| device_error("read failed", err))?;

    print_report(
        &MemoryReport {
            board: args.board,
            channel: args.channel,
            addr: args.addr,
            value,
        },
        format,
    );
    Ok(SUCCESS)
}
