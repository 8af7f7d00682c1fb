//! vdev_id CLI tool
//!
//! Resolves a block device's enclosure location into a stable vdev alias.
//! Intended to be invoked from a udev rule, e.g.:
//!
//! ```text
//! KERNEL=="sd*[!0-9]", IMPORT{program}="vdev_id -d %k"
//! ```
//!
//! On success two udev key/value lines are printed:
//!
//! ```text
//! ID_VDEV=A3
//! ID_VDEV_PATH=disk/by-vdev/A3
//! ```
//!
//! A device with no mapping (or a host with no configuration file) produces
//! no output and exits successfully.

use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use vdev_id::{ConfigTable, DeviceContext, Resolver, DEFAULT_CONFIG_PATH};

/// Resolve a block device's enclosure location into a stable vdev alias.
#[derive(Parser, Debug)]
#[command(name = "vdev_id")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Block device name to resolve (e.g. "sda")
    #[arg(short = 'd', long = "device", value_name = "DEVICE")]
    device: String,

    /// Path to the vdev configuration file
    #[arg(
        short = 'c',
        long = "config",
        value_name = "FILE",
        default_value = DEFAULT_CONFIG_PATH
    )]
    config: PathBuf,

    /// Storage topology, overriding the configuration file
    #[arg(short = 'g', long = "topology", value_name = "sas_direct|sas_switch")]
    topology: Option<String>,

    /// Number of phys per HBA port, overriding the configuration file
    #[arg(
        short = 'p',
        long = "phys-per-port",
        value_name = "N",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    phys_per_port: Option<u64>,

    /// Resolve multipath maps to their first running component disk
    #[arg(short = 'm', long = "multipath")]
    multipath: bool,
}

/// Collects the udev-supplied event attributes from the environment.
fn device_context(args: &Args) -> DeviceContext {
    DeviceContext {
        device: args.device.clone(),
        dm_name: env::var("DM_NAME").ok().filter(|v| !v.is_empty()),
        devtype: env::var("DEVTYPE").ok().filter(|v| !v.is_empty()),
        devlinks: env::var("DEVLINKS")
            .map(|v| v.split_whitespace().map(String::from).collect())
            .unwrap_or_default(),
        topology: args.topology.clone(),
        phys_per_port: args.phys_per_port,
        multipath: args.multipath.then_some(true),
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let table = match ConfigTable::load(&args.config) {
        Ok(Some(table)) => table,
        // No configuration file: alias resolution is simply not in use.
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("vdev_id: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let ctx = device_context(&args);
    let code = match Resolver::new(&table).resolve(&ctx) {
        Ok(Some(alias)) => {
            println!("ID_VDEV={}", alias);
            println!("ID_VDEV_PATH=disk/by-vdev/{}", alias);
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("vdev_id: {}", e);
            ExitCode::FAILURE
        }
    };
    code
}
