//! Live Pack Monitor
//!
//! A standalone tool to connect to a pack over a serial port, read a
//! telemetry snapshot and the per-cell voltages, and print them.
//!
//! Usage:
//!   cargo run --example monitor -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: autodetect)
//!   --baud RATE       Baud rate (default: 9600)
//!   --config          Also read the full configuration

use cellscope_core::protocol::{autodetect, Session, SessionConfig, DEFAULT_BAUD_RATE};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    let mut port_name: Option<String> = None;
    let mut baud_rate = DEFAULT_BAUD_RATE;
    let mut read_config = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    port_name = Some(args[i].clone());
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if i < args.len() {
                    baud_rate = args[i].parse().unwrap_or(DEFAULT_BAUD_RATE);
                }
            }
            "--config" => read_config = true,
            other => port_name = Some(other.to_string()),
        }
        i += 1;
    }

    let port_name = match port_name {
        Some(name) => name,
        None => {
            println!("Scanning for a pack...");
            let endpoints = autodetect(baud_rate).await;
            for ep in &endpoints {
                println!(
                    "  {} probed={} confirmed={}",
                    ep.port.name, ep.probed, ep.confirmed
                );
            }
            match endpoints.into_iter().find(|ep| ep.confirmed) {
                Some(ep) => ep.port.name,
                None => {
                    eprintln!("No pack found");
                    std::process::exit(1);
                }
            }
        }
    };

    let mut config = SessionConfig::default();
    config.baud_rate = baud_rate;
    let session = Session::new(config);

    if let Err(e) = session.connect_port(&port_name).await {
        eprintln!("Connect to {} failed: {}", port_name, e);
        std::process::exit(1);
    }
    println!("Connected to {}", port_name);

    match session.read_telemetry().await {
        Ok(t) => {
            println!("Pack:     {:.2} V  {:+.2} A  {} %", t.pack_voltage, t.current, t.rsoc);
            println!(
                "Capacity: {:.2} / {:.2} Ah, {} cycles, built {}",
                t.remaining_capacity, t.nominal_capacity, t.cycle_count, t.manufacture_date
            );
            println!(
                "FETs:     charge={} discharge={}",
                t.charging_enabled, t.discharging_enabled
            );
            if t.protection.any() {
                println!("Protection tripped: {:?}", t.protection);
            }
            for (i, temp) in t.temperatures.iter().enumerate() {
                println!("NTC {}:    {:.1} °C", i + 1, temp);
            }
        }
        Err(e) => eprintln!("Telemetry read failed: {}", e),
    }

    match session.read_cell_voltages().await {
        Ok(cells) => {
            for (i, v) in cells.cells.iter().enumerate() {
                println!("Cell {:2}:  {:.3} V", i + 1, v);
            }
            if let Some(delta) = cells.delta() {
                println!("Delta:    {:.0} mV", delta * 1000.0);
            }
        }
        Err(e) => eprintln!("Cell read failed: {}", e),
    }

    if read_config {
        match session.read_config().await {
            Ok(cfg) => {
                println!("Device:   {} ({})", cfg.device_name, cfg.manufacturer_name);
                println!(
                    "Limits:   cell {:.3}–{:.3} V, pack {:.2}–{:.2} V",
                    cfg.cell_under_voltage,
                    cfg.cell_over_voltage,
                    cfg.pack_under_voltage,
                    cfg.pack_over_voltage
                );
            }
            Err(e) => eprintln!("Config read failed: {}", e),
        }
    }

    session.disconnect().await;
}
