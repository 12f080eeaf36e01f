pub mod commands;

pub use commands::{apply_overrides, build_cli, config_path, handle_subcommands};
