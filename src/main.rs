use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

use modbus_sim_server::cli;
use modbus_sim_server::config::{Config, InitialStateSource};
use modbus_sim_server::registers::RegisterMap;
use modbus_sim_server::sensors;
use modbus_sim_server::services::{BackgroundUpdater, ConnectionMultiplexer, RequestProcessor};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli::build_cli().get_matches();

    let level = if matches.get_flag("verbose") { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    if cli::handle_subcommands(&matches)? {
        return Ok(());
    }

    info!("🚀 Starting Modbus simulation server v{}", modbus_sim_server::VERSION);

    let config_path = cli::config_path(&matches);
    let mut config = Config::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    cli::apply_overrides(&matches, &mut config);
    config.validate()?;

    let state = config.load().context("building the initial register map")?;
    let sizes = state.sizes;
    let map = Arc::new(RegisterMap::from_initial_state(state)?);
    info!(
        "📊 Register map: {} coils, {} discrete inputs, {} holding registers, {} input registers",
        sizes.coils, sizes.discrete_inputs, sizes.holding_registers, sizes.input_registers
    );

    let sensor =
        sensors::from_config(&config.updater.sensor).context("configuring the sensor source")?;
    let processor = RequestProcessor::new(Arc::clone(&map));
    let mut server = ConnectionMultiplexer::bind(
        config.server.socket_addr()?,
        config.server.backlog,
        processor,
    )
    .context("starting the Modbus TCP listener")?;

    let updater = BackgroundUpdater::new(
        Arc::clone(&map),
        sensor,
        Duration::from_secs(config.updater.interval_seconds),
    )
    .with_register(config.updater.register)
    .spawn();

    let outcome = tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown requested");
            Ok(())
        }
    };

    updater.abort();
    drop(server);

    if let Err(e) = outcome {
        error!("❌ Server stopped: {}", e);
        return Err(e.into());
    }

    info!("👋 Server stopped");
    Ok(())
}
