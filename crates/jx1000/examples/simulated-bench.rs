//! A full bench run against the built-in simulator: identify the device,
//! store and read back a value, upload a rules file and run a test.
//!
//! Run with:
//!   cargo run --example simulated-bench

use std::time::Duration;

use jx1000::device::{Session, SimConfig, SimulatedDevice, TransferPhase};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (host, _sim) = SimulatedDevice::pair(SimConfig::default())?;

    let session = Session::new("simulator");
    session.subscribe(|event| eprintln!("{event}"));
    session.open_stream(host)?;

    let info = session.query_info()?;
    println!("connected to firmware {}", info.version);

    session.write_memory(1, 2, 10, 3.5)?;
    println!("read back {}", session.read_memory(1, 2, 10)?);

    let rules: Vec<u8> = (0..400u32).map(|i| (i % 251) as u8).collect();
    let phase = session.download_rules(rules)?.join();
    if phase != TransferPhase::Done {
        return Err(format!("upload ended in {phase:?}").into());
    }

    session.start_test()?;
    // Give the verdict time to arrive on the event callback.
    std::thread::sleep(Duration::from_millis(200));

    session.close();
    Ok(())
}
