use std::time::Instant;

use jx1000_device::SessionConfig;
use jx1000_frame::Command;

use crate::cmd::{event_stream, open_session, parse_timeout, Connection, StopArgs};
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_event, OutputFormat};

pub fn run(args: StopArgs, conn: &Connection, format: OutputFormat) -> CliResult<i32> {
    let linger = parse_timeout(&args.linger)?;
    let device = open_session(conn, SessionConfig::default())?;
    let events = event_stream(&device.session);

    device
        .session
        .stop_test()
        .map_err(|err| device_error("stop failed", err))?;

    let deadline = Instant::now() + linger;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(event) if matches!(event.command, Command::Log | Command::Result) => {
                print_event(&event, format);
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    Ok(SUCCESS)
}
