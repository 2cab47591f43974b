//! Watch the bus: print node status transitions as heartbeats come and go.

use anyhow::{Context, Result};
use clap::Parser;
use modio::{Config, Engine};

#[derive(Parser)]
#[command(name = "modio-monitor", version, about = "Watch node liveness")]
struct Args {
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

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut engine =
        Engine::new(&Config::new(&args.interface, args.local_id)).context("engine setup failed")?;

    engine.client_mut().set_status_callback(|client, node, previous, new| {
        if previous.mode == new.mode && previous.health == new.health {
            return;
        }
        println!(
            "node {node:3}: {:?}/{:?} -> {:?}/{:?} (uptime {} s, vendor {:#04x})",
            previous.mode, previous.health, new.mode, new.health, new.uptime, new.vendor_status
        );

        if !previous.is_online() && new.is_online() {
            let result = client.get_node_info(node, move |_, result| match result {
                Ok(info) => println!("node {node:3}: {}", info.name),
                Err(e) => println!("node {node:3}: GetInfo failed: {e}"),
            });
            if let Err(e) = result {
                println!("node {node:3}: GetInfo dispatch failed: {e}");
            }
        }
    });

    println!("listening on {}, ctrl-c to quit", args.interface);
    loop {
        engine.wait_for_event()?;
        engine.tick()?;
    }
}
