pub mod multiplexer;
pub mod processor;
pub mod updater;

pub use multiplexer::ConnectionMultiplexer;
pub use processor::RequestProcessor;
pub use updater::BackgroundUpdater;
