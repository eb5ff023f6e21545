use jx1000_modbus::{
    MappedPair, ModbusClient, ModbusConfig, ModuleSimConfig, Output, SimulatedModule,
    TestOutcome, WordOrder,
};
use jx1000_transport::SerialStream;
use serde::Serialize;

use crate::cmd::{
    parse_timeout, Connection, ModbusCommand, ModbusLink, ModbusMappedArgs, ModbusReadArgs,
    ModbusTestArgs, ModbusWriteArgs,
};
use crate::exit::{modbus_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_report, OutputFormat, Report};

pub fn run(command: ModbusCommand, conn: &Connection, format: OutputFormat) -> CliResult<i32> {
    match command {
        ModbusCommand::Read(args) => read(args, conn, format),
        ModbusCommand::Write(args) => write(args, conn, format),
        ModbusCommand::Mapped(args) => mapped(args, conn, format),
        ModbusCommand::Test(args) => test(args, conn, format),
    }
}

/// A client, with the simulated module behind it when `--simulate` is set.
struct Module {
    client: ModbusClient<SerialStream>,
    _sim: Option<SimulatedModule>,
}

fn connect(link: &ModbusLink, conn: &Connection) -> CliResult<Module> {
    let mut config = ModbusConfig {
        slave: link.slave,
        ..ModbusConfig::default()
    };
    config.serial.baud_rate = link.modbus_baud;

    if conn.simulate {
        let sim_config = ModuleSimConfig {
            slave: link.slave,
            ..ModuleSimConfig::default()
        };
        let (host, sim) = SimulatedModule::pair(sim_config)
            .map_err(|err| modbus_error("simulator failed", err))?;
        seed_simulator(&sim);
        let client = ModbusClient::connect(host, &config)
            .map_err(|err| modbus_error("connect failed", err))?;
        return Ok(Module {
            client,
            _sim: Some(sim),
        });
    }

    let port = link.modbus_port.as_deref().ok_or_else(|| {
        CliError::new(
            USAGE,
            "no Modbus port given (use --modbus-port, JX1000_MODBUS_PORT or --simulate)",
        )
    })?;
    let client =
        ModbusClient::open(port, &config).map_err(|err| modbus_error("open failed", err))?;
    Ok(Module { client, _sim: None })
}

/// Give the simulated module a plausible voltage on every mapped input.
fn seed_simulator(sim: &SimulatedModule) {
    for input in jx1000_modbus::mapping::MAPPED_FIRST..=jx1000_modbus::mapping::MAPPED_LAST {
        let volts = f32::from(input - jx1000_modbus::mapping::MAPPED_FIRST) / 100.0;
        let _ = sim.set_mapped_value(input, volts);
    }
}

#[derive(Serialize)]
struct RegisterRow {
    register: u16,
    value: u16,
}

#[derive(Serialize)]
struct RegistersReport {
    registers: Vec<RegisterRow>,
}

impl Report for RegistersReport {
    fn header(&self) -> Vec<&'static str> {
        vec!["REGISTER", "VALUE"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.registers
            .iter()
            .map(|row| vec![row.register.to_string(), row.value.to_string()])
            .collect()
    }

    fn pretty(&self) -> String {
        self.registers
            .iter()
            .map(|row| format!("[{}] = {}", row.register, row.value))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn raw(&self) -> String {
        self.registers
            .iter()
            .map(|row| row.value.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn read(args: ModbusReadArgs, conn: &Connection, format: OutputFormat) -> CliResult<i32> {
    let mut module = connect(&args.link, conn)?;
    let values = module
        .client
        .read_holding_registers(args.start, args.count)
        .map_err(|err| modbus_error("read failed", err))?;

    let registers = values
        .into_iter()
        .enumerate()
        .map(|(i, value)| RegisterRow {
            register: args.start.wrapping_add(i as u16),
            value,
        })
        .collect();
    print_report(&RegistersReport { registers }, format);
    Ok(SUCCESS)
}

/// The output whose "on" register is `addr`, when `value` is a switch state.
fn output_switch(addr: u16, value: u16) -> Option<(Output, bool)> {
    let output = [Output::One, Output::Two]
        .into_iter()
        .find(|output| output.register() == addr)?;
    match value {
        0 => Some((output, false)),
        1 => Some((output, true)),
        _ => None,
    }
}

fn write(args: ModbusWriteArgs, conn: &Connection, format: OutputFormat) -> CliResult<i32> {
    let mut module = connect(&args.link, conn)?;
    let result = match output_switch(args.addr, args.value) {
        Some((output, on)) => module.client.set_output(output, on),
        None => module.client.write_register(args.addr, args.value),
    };
    result.map_err(|err| modbus_error("write failed", err))?;

    let registers = vec![RegisterRow {
        register: args.addr,
        value: args.value,
    }];
    print_report(&RegistersReport { registers }, format);
    Ok(SUCCESS)
}

#[derive(Serialize)]
struct MappedRow {
    #[serde(flatten)]
    pair: MappedPair,
    voltage: f32,
}

#[derive(Serialize)]
struct MappedReport {
    word_order: WordOrder,
    inputs: Vec<MappedRow>,
}

impl Report for MappedReport {
    fn header(&self) -> Vec<&'static str> {
        vec!["INPUT", "REGISTERS", "VALUES", "VOLTAGE"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.inputs
            .iter()
            .map(|row| {
                vec![
                    row.pair.input.to_string(),
                    format!("{}, {}", row.pair.registers[0], row.pair.registers[1]),
                    format!("{}, {}", row.pair.values[0], row.pair.values[1]),
                    row.voltage.to_string(),
                ]
            })
            .collect()
    }

    fn pretty(&self) -> String {
        self.inputs
            .iter()
            .map(|row| {
                format!(
                    "[{}] > {},{} = {},{} | Voltage: {}V",
                    row.pair.input,
                    row.pair.registers[0],
                    row.pair.registers[1],
                    row.pair.values[0],
                    row.pair.values[1],
                    row.voltage
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn raw(&self) -> String {
        self.inputs
            .iter()
            .map(|row| row.voltage.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn mapped(args: ModbusMappedArgs, conn: &Connection, format: OutputFormat) -> CliResult<i32> {
    let word_order: WordOrder = args
        .word_order
        .parse()
        .map_err(|err: String| CliError::new(USAGE, err))?;
    let mut module = connect(&args.link, conn)?;

    let pairs = module
        .client
        .read_mapped_pairs(args.start, args.count)
        .map_err(|err| modbus_error("mapped read failed", err))?;

    let inputs = pairs
        .into_iter()
        .map(|pair| MappedRow {
            voltage: pair.value(word_order),
            pair,
        })
        .collect();
    print_report(&MappedReport { word_order, inputs }, format);
    Ok(SUCCESS)
}

#[derive(Serialize)]
struct OutcomeReport {
    #[serde(flatten)]
    outcome: TestOutcome,
    text: String,
}

impl Report for OutcomeReport {
    fn header(&self) -> Vec<&'static str> {
        vec!["RESULT"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![self.text.clone()]]
    }

    fn pretty(&self) -> String {
        format!("Test result: {}", self.text)
    }

    fn raw(&self) -> String {
        self.text.clone()
    }
}

fn test(args: ModbusTestArgs, conn: &Connection, format: OutputFormat) -> CliResult<i32> {
    let settle = parse_timeout(&args.settle)?;
    let mut module = connect(&args.link, conn)?;

    let outcome = module
        .client
        .run_test(settle)
        .map_err(|err| modbus_error("test failed", err))?;

    print_report(
        &OutcomeReport {
            outcome,
            text: outcome.to_string(),
        },
        format,
    );
    Ok(if outcome == TestOutcome::Pass {
        SUCCESS
    } else {
        FAILURE
    })
}
