use jx1000_device::{DeviceInfo, SessionConfig};
use serde::Serialize;

use crate::cmd::{open_session, parse_timeout, Connection, InfoArgs};
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_report, OutputFormat, Report};

#[derive(Serialize)]
struct InfoReport {
    port: String,
    #[serde(flatten)]
    info: DeviceInfo,
}

impl Report for InfoReport {
    fn header(&self) -> Vec<&'static str> {
        vec!["FIELD", "VALUE"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![
            vec!["Port".into(), self.port.clone()],
            vec!["Hardware type".into(), self.info.hard_type.to_string()],
            vec!["Firmware".into(), self.info.version.clone()],
            vec!["COM number".into(), self.info.com_number.to_string()],
            vec!["Boards".into(), self.info.board_count.to_string()],
            vec!["Command bytes".into(), self.info.cmd_bytes.to_string()],
        ]
    }

    fn pretty(&self) -> String {
        format!("{}: {}", self.port, self.info)
    }

    fn raw(&self) -> String {
        self.info.version.clone()
    }
}

pub fn run(args: InfoArgs, conn: &Connection, format: OutputFormat) -> CliResult<i32> {
    let config = SessionConfig {
        info_timeout: parse_timeout(&args.timeout)?,
        ..SessionConfig::default()
    };
    let device = open_session(conn, config)?;

    let info = device
        .session
        .query_info()
        .map_err(|err| device_error("info failed", err))?;

    let report = InfoReport {
        port: device.session.port_name().to_string(),
        info,
    };
    print_report(&report, format);
    Ok(SUCCESS)
}
