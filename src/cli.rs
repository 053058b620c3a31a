use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bridge between a serial macro-pad and the host PC")]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Serial port to use; stored as the preferred port
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<String>,

    /// Print the available serial ports and exit
    #[arg(long)]
    pub list_ports: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: log::LevelFilter,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::ConfigStore::default_path)
    }
}
