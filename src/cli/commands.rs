use clap::{Arg, ArgAction, ArgMatches, Command};
use log::info;
use std::path::PathBuf;

use crate::config::Config;
use crate::utils::error::ServerError;

pub const DEFAULT_CONFIG_PATH: &str = "config/server.toml";

pub fn build_cli() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .version(crate::VERSION)
        .about("Multi-client Modbus TCP server with a simulated sensor feed")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .default_value(DEFAULT_CONFIG_PATH)
                .help("Configuration file"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("IP")
                .help("Override server.ip_addr"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16))
                .help("Override server.port"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable debug logging"),
        )
        .subcommand(
            Command::new("init-config")
                .about("Write a sample configuration file and exit")
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite an existing file"),
                ),
        )
}

pub fn config_path(matches: &ArgMatches) -> PathBuf {
    matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Command line values win over the file
pub fn apply_overrides(matches: &ArgMatches, config: &mut Config) {
    if let Some(ip) = matches.get_one::<String>("bind") {
        config.server.ip_addr = ip.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }
}

/// Returns `Ok(true)` when a subcommand ran and the server should not start
pub fn handle_subcommands(matches: &ArgMatches) -> Result<bool, ServerError> {
    if let Some(sub) = matches.subcommand_matches("init-config") {
        let path = config_path(matches);
        if path.exists() && !sub.get_flag("force") {
            return Err(ServerError::ConfigError(format!(
                "{} already exists, pass --force to overwrite",
                path.display()
            )));
        }

        Config::default().save_to_file(&path)?;
        info!("✅ Sample configuration written to {}", path.display());
        return Ok(true);
    }

    Ok(false)
}
