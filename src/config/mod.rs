pub mod initial_state;
pub mod settings;

pub use initial_state::InitialStateSource;
pub use settings::{Config, DefaultValues, SensorConfig, ServerSettings, UpdaterSettings};
