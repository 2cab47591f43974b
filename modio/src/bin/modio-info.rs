//! Print the identity structure of one node.

use anyhow::{Context, Result};
use clap::Parser;
use modio::{Config, Engine};

#[derive(Parser)]
#[command(name = "modio-info", version, about = "Dump a node's GetInfo structure")]
struct Args {
    /// Target node ID, 0-127, decimal or 0x-prefixed hex
    #[arg(value_parser = parse_node_id)]
    node: u8,

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

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut engine =
        Engine::new(&Config::new(&args.interface, args.local_id)).context("engine setup failed")?;
    let info = engine
        .get_node_info_sync(args.node)
        .with_context(|| format!("GetInfo from node {} failed", args.node))?;

    println!("Name:             {}", info.name);
    println!(
        "Protocol version: {}.{}",
        info.protocol_version.major, info.protocol_version.minor
    );
    println!(
        "Hardware version: {}.{}",
        info.hardware_version.major, info.hardware_version.minor
    );
    println!(
        "Software version: {}.{}",
        info.software_version.major, info.software_version.minor
    );
    println!("VCS revision:     {:016x}", info.software_vcs_revision_id);
    println!("Unique ID:        {}", hex_string(&info.unique_id));
    match info.software_image_crc {
        Some(crc) => println!("Image CRC:        {crc:016x}"),
        None => println!("Image CRC:        (not reported)"),
    }
    match &info.certificate_of_authenticity {
        Some(coa) => println!("CoA:              {}", hex_string(coa)),
        None => println!("CoA:              (not reported)"),
    }
    Ok(())
}
