pub mod clock;
pub mod config;
pub mod constants;
pub mod cpu_type;
pub mod display;
pub mod energy;
pub mod error;
pub mod integrator;
pub mod monitor;
pub mod power;
pub mod sample;
pub mod source;
pub mod util;

pub use config::{PackageBackend, SamplerConfig, SourceKind};
pub use display::TextSink;
pub use error::{Result, SamplerError};
pub use monitor::{LoopState, RunSummary, SamplingLoop};
pub use sample::{Reading, Sample, SampleEntry, SampleSink};

use crate::clock::MonotonicClock;

/// Installs the stderr logger, `RUST_LOG` overrides the default level
pub fn init_logging() {
	env_logger::Builder::from_default_env()
		.filter_level(log::LevelFilter::Info)
		.parse_default_env()
		.init();
}

/// Opens the configured sources and samples them until the duration elapses
///
/// This is the main entry point used by the binary.
pub fn run(config: &SamplerConfig, sink: &mut dyn SampleSink) -> Result<RunSummary> {
	config.validate()?;
	let sources = source::open_sources(config)?;
	let mut sampler = SamplingLoop::new(config, sources, MonotonicClock)?;
	sampler.run(sink)
}
