use std::time::Instant;

use jx1000_device::{EventValue, SessionConfig, TestVerdict};
use jx1000_frame::Command;
use serde::Serialize;

use crate::cmd::{event_stream, open_session, parse_timeout, Connection, StartArgs};
use crate::exit::{device_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_event, print_report, OutputFormat, Report};

#[derive(Serialize)]
struct VerdictReport {
    verdict: TestVerdict,
}

impl Report for VerdictReport {
    fn header(&self) -> Vec<&'static str> {
        vec!["VERDICT"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![self.verdict.to_string()]]
    }

    fn pretty(&self) -> String {
        format!("Test result: {}", self.verdict)
    }

    fn raw(&self) -> String {
        self.verdict.to_string()
    }
}

pub fn run(args: StartArgs, conn: &Connection, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_timeout(&args.timeout)?;
    let device = open_session(conn, SessionConfig::default())?;
    let events = event_stream(&device.session);

    device
        .session
        .start_test()
        .map_err(|err| device_error("start failed", err))?;
    if args.no_wait {
        return Ok(SUCCESS);
    }

    let deadline = Instant::now() + timeout;
    let mut verdict = None;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        let Ok(event) = events.recv_timeout(left) else {
            break;
        };
        if !matches!(event.command, Command::Log | Command::Result) {
            continue;
        }
        print_event(&event, format);

        match &event.value {
            EventValue::Verdict(found) => verdict = Some(*found),
            EventValue::Text(text) if text == "Test End" && verdict.is_some() => break,
            _ => {}
        }
    }

    let verdict = verdict.ok_or_else(|| {
        CliError::new(TIMEOUT, format!("no test verdict within {timeout:?}"))
    })?;
    print_report(&VerdictReport { verdict }, format);
    Ok(match verdict {
        TestVerdict::Pass => SUCCESS,
        TestVerdict::Fail => FAILURE,
    })
}
