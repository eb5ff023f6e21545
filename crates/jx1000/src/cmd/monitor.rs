use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jx1000_device::{Event, SessionConfig};

use crate::cmd::{event_stream, open_session, Connection, MonitorArgs};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_event, OutputFormat};

const POLL: Duration = Duration::from_millis(100);

pub fn run(args: MonitorArgs, conn: &Connection, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    // The probe sent on open may be answered before the subscription exists.
    let device = open_session(conn, SessionConfig::default())?;
    let events = event_stream(&device.session);

    // An unfiltered, unbounded human-readable monitor prints straight from the
    // receive thread.
    let console = uses_console(&args, format);
    if console {
        device.session.events().set_console(io::stdout());
    }
    let _ = device.session.request_info();

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) && device.session.is_open() {
        let Ok(event) = events.recv_timeout(POLL) else {
            continue;
        };
        if console || !wanted(&event, args.commands.as_deref()) {
            continue;
        }

        print_event(&event, format);
        printed = printed.saturating_add(1);
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    if console {
        device.session.events().clear_console();
    }
    Ok(SUCCESS)
}

fn uses_console(args: &MonitorArgs, format: OutputFormat) -> bool {
    matches!(format, OutputFormat::Table | OutputFormat::Pretty)
        && args.commands.is_none()
        && args.count.is_none()
}

fn wanted(event: &Event, filter: Option<&[String]>) -> bool {
    match filter {
        Some(names) => {
            let name = event.command.to_string();
            names.iter().any(|n| n.eq_ignore_ascii_case(&name))
        }
        None => true,
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
