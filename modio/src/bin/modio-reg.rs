//! Register tool: dump, read or write the registers of one node.
//!
//! With only a node ID the whole register namespace is walked and printed.
//! Adding a register name reads that register; adding a type tag and values
//! writes it first and prints what the node holds afterwards.

use anyhow::{Context, Result, bail};
use clap::Parser;
use modio::{Config, Engine, RegisterValue};

#[derive(Parser)]
#[command(
    name = "modio-reg",
    version,
    about = "Dump, read or write node registers"
)]
struct Args {
    /// Target node ID, 0-127, decimal or 0x-prefixed hex
    #[arg(value_parser = parse_node_id)]
    node: u8,

    /// Register name; omit to dump every register
    name: Option<String>,

    /// Value type tag for a write: 9 = uint32, 10 = uint16, 11 = uint8
    value_type: Option<u8>,

    /// Values to write, decimal or 0x-prefixed hex
    values: Vec<String>,

    /// CAN interface to use
    #[arg(short, long, default_value = "can0")]
    interface: String,

    /// Node ID this host claims on the bus
    #[arg(short, long, default_value_t = 127, value_parser = parse_node_id)]
    local_id: u8,
}

fn parse_node_id(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    match parsed {
        Ok(id) if id <= 127 => Ok(id),
        _ => Err(String::from("node ID must be between 0 and 127 inclusive")),
    }
}

fn parse_scalar(s: &str) -> Result<u64> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.with_context(|| format!("invalid value {s:?}"))
}

fn build_write(value_type: u8, values: &[String]) -> Result<RegisterValue> {
    let scalars: Vec<u64> = values
        .iter()
        .map(|v| parse_scalar(v))
        .collect::<Result<_>>()?;
    let value = match value_type {
        9 => RegisterValue::Uint32(scalars.iter().map(|&v| v as u32).collect()),
        10 => RegisterValue::Uint16(scalars.iter().map(|&v| v as u16).collect()),
        11 => RegisterValue::Uint8(scalars.iter().map(|&v| v as u8).collect()),
        other => bail!("unsupported type tag {other}; use 9, 10 or 11"),
    };
    Ok(value)
}

fn print_register(name: &str, value: &RegisterValue) {
    let rendered = match value {
        RegisterValue::String(v) => format!("{:?}", String::from_utf8_lossy(v)),
        RegisterValue::Uint8(v) => format!("{v:?}"),
        RegisterValue::Uint16(v) => format!("{v:?}"),
        RegisterValue::Uint32(v) => format!("{v:?}"),
        RegisterValue::Uint64(v) => format!("{v:?}"),
        RegisterValue::Int8(v) => format!("{v:?}"),
        RegisterValue::Int16(v) => format!("{v:?}"),
        RegisterValue::Int32(v) => format!("{v:?}"),
        RegisterValue::Int64(v) => format!("{v:?}"),
        RegisterValue::Float32(v) => format!("{v:?}"),
        RegisterValue::Float64(v) => format!("{v:?}"),
        other => format!("{other:?}"),
    };
    println!("{name:<50} {:2}  {rendered}", value.tag());
}

fn dump_registers(engine: &mut Engine, node: u8) -> Result<()> {
    for index in 0..=u16::MAX {
        let name = engine
            .register_list_sync(node, index)
            .context("error listing registers")?;
        if name.is_empty() {
            break;
        }
        let value = engine
            .register_access_sync(node, &name, None)
            .with_context(|| format!("error reading register {name:?}"))?;
        print_register(&name, &value);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut engine =
        Engine::new(&Config::new(&args.interface, args.local_id)).context("engine setup failed")?;

    let Some(name) = &args.name else {
        return dump_registers(&mut engine, args.node);
    };

    let write = match args.value_type {
        Some(value_type) => {
            if args.values.is_empty() {
                bail!("a write needs at least one value");
            }
            Some(build_write(value_type, &args.values)?)
        }
        None => None,
    };

    let value = engine
        .register_access_sync(args.node, name, write.as_ref())
        .with_context(|| format!("error accessing register {name:?}"))?;
    print_register(name, &value);
    Ok(())
}
