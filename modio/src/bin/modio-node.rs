//! Issue a standard command to one node.

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use modio::{CommandStatus, Config, Engine, command};

#[derive(Parser)]
#[command(name = "modio-node", version, about = "Run a standard node command")]
struct Args {
    /// Target node ID, 0-127, decimal or 0x-prefixed hex
    #[arg(value_parser = parse_node_id)]
    node: u8,

    /// Command to execute
    #[arg(value_enum)]
    action: Action,

    /// CAN interface to use
    #[arg(short, long, default_value = "can0")]
    interface: String,

    /// Node ID this host claims on the bus
    #[arg(short, long, default_value_t = 127, value_parser = parse_node_id)]
    local_id: u8,
}

#[derive(Copy, Clone, ValueEnum)]
enum Action {
    /// Restart the node
    Restart,
    /// Restore factory defaults
    FactoryReset,
    /// Store volatile settings to EEPROM
    Store,
    /// Switch the node into software-update mode
    BeginSoftwareUpdate,
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

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let command_id = match args.action {
        Action::Restart => command::RESTART,
        Action::FactoryReset => command::FACTORY_RESET,
        Action::Store => command::STORE_PERSISTENT_STATES,
        Action::BeginSoftwareUpdate => command::BEGIN_SOFTWARE_UPDATE,
    };

    let mut engine =
        Engine::new(&Config::new(&args.interface, args.local_id)).context("engine setup failed")?;
    let status = engine
        .execute_command_sync(args.node, command_id, &[])
        .with_context(|| format!("command to node {} failed", args.node))?;

    if status != CommandStatus::Success {
        bail!("node {} answered {:?}", args.node, status);
    }
    println!("node {}: ok", args.node);
    Ok(())
}
