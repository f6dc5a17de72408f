//! VayuMon daemon entry point.

use clap::Parser;
use std::path::PathBuf;
use vayu_mon::app::App;
use vayu_mon::devices::sqm::discovery;
use vayu_mon::{Config, Result};

const DEFAULT_CONFIG: &str = "/etc/vayu-mon.toml";

#[derive(Parser)]
#[command(name = "vayu-mon", version, about = "Observatory environment-monitoring daemon")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Generate a default configuration file here and exit
    #[arg(short, long)]
    default: bool,

    /// Discover SQM devices on the LAN and exit
    #[arg(short = 'f', long = "sqm")]
    find_sqm: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.default {
        let path = PathBuf::from("vayu-mon.toml");
        Config::write_default(&path)?;
        println!("default configuration written to {}", path.display());
        return Ok(());
    }

    if cli.find_sqm {
        let units = discovery::discover()?;
        if units.is_empty() {
            println!("no SQM devices answered");
        }
        for unit in units {
            println!("{}  {}", unit.ip, unit.mac);
        }
        return Ok(());
    }

    log::info!("vayu-mon v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!("using config: {}", cli.config.display());
    let config = Config::load(&cli.config)?;

    let mut app = App::new(config)?;
    app.run()
}
