use std::time::Duration;

use jx1000_device::{SessionConfig, TransferPhase};
use jx1000_frame::Command;
use serde::Serialize;

use crate::cmd::{event_stream, open_session, parse_timeout, Connection, DownloadArgs};
use crate::exit::{device_error, io_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_event, print_report, OutputFormat, Report};

const POLL: Duration = Duration::from_millis(50);

#[derive(Serialize)]
struct DownloadReport {
    file: String,
    bytes: usize,
    chunks: usize,
    phase: TransferPhase,
}

impl Report for DownloadReport {
    fn header(&self) -> Vec<&'static str> {
        vec!["FILE", "BYTES", "CHUNKS", "RESULT"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![
            self.file.clone(),
            self.bytes.to_string(),
            self.chunks.to_string(),
            format!("{:?}", self.phase),
        ]]
    }

    fn pretty(&self) -> String {
        format!(
            "uploaded {} ({} bytes, {} chunks): {:?}",
            self.file, self.bytes, self.chunks, self.phase
        )
    }

    fn raw(&self) -> String {
        format!("{:?}", self.phase)
    }
}

pub fn run(args: DownloadArgs, conn: &Connection, format: OutputFormat) -> CliResult<i32> {
    let rules = std::fs::read(&args.file)
        .map_err(|err| io_error(&format!("cannot read {}", args.file.display()), err))?;
    let config = SessionConfig {
        chunk_ack_timeout: parse_timeout(&args.chunk_timeout)?,
        ..SessionConfig::default()
    };
    let device = open_session(conn, config)?;
    let session = &device.session;

    let events = event_stream(session);
    let bytes = rules.len();
    let chunks = bytes.div_ceil(session.config().effective_chunk_size());
    let handle = session
        .download_rules(rules)
        .map_err(|err| device_error("upload rejected", err))?;

    while !handle.is_finished() {
        if let Ok(event) = events.recv_timeout(POLL) {
            if event.command == Command::RuleDown {
                print_event(&event, format);
            }
        }
    }
    let phase = handle.join();
    for event in events.try_iter() {
        if event.command == Command::RuleDown {
            print_event(&event, format);
        }
    }

    print_report(
        &DownloadReport {
            file: args.file.display().to_string(),
            bytes,
            chunks,
            phase,
        },
        format,
    );
    Ok(if phase == TransferPhase::Done {
        SUCCESS
    } else {
        FAILURE
    })
}
