use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{DEFAULT_DURATION_SECS, POWERCAP_ROOT};
use crate::error::{Result, SamplerError};

/// Hardware counters the sampler knows how to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
	/// CPU package energy (RAPL)
	Package,
	/// DRAM energy of package 0 (RAPL)
	Dram,
	/// NVIDIA GPU board power, one meter per device
	Gpu,
	/// Baseboard management controller power via DCMI
	Bmc,
}

impl SourceKind {
	/// Column label used in samples
	pub fn label(&self) -> &'static str {
		match self {
			SourceKind::Package => "CPU",
			SourceKind::Dram => "DRAM",
			SourceKind::Gpu => "GPU",
			SourceKind::Bmc => "IPMI",
		}
	}

	/// Mandatory sources abort the run when they cannot be opened or read
	pub fn is_mandatory(&self) -> bool {
		matches!(self, SourceKind::Package)
	}
}

impl fmt::Display for SourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.label())
	}
}

/// Where package energy is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageBackend {
	/// `energy_uj` file of the powercap framework
	#[default]
	Powercap,
	/// RAPL energy status MSR through /dev/cpu/*/msr
	Msr,
}

/// Everything the sampling loop needs to know before it starts
#[derive(Debug, Clone)]
pub struct SamplerConfig {
	pub interval: Duration,
	pub duration: Duration,

	/// Enabled sources, in output order
	pub sources: Vec<SourceKind>,

	/// Include per-interval energy next to power
	pub report_energy: bool,

	/// Emit one entry per GPU device in addition to the GPU total
	pub per_device: bool,

	/// Wait for a wall-clock interval boundary before the first deadline
	pub align_to_wall_clock: bool,

	pub package_backend: PackageBackend,
	pub powercap_root: PathBuf,
}

impl Default for SamplerConfig {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(1),
			duration: Duration::from_secs(DEFAULT_DURATION_SECS),
			sources: vec![SourceKind::Package],
			report_energy: false,
			per_device: false,
			align_to_wall_clock: true,
			package_backend: PackageBackend::default(),
			powercap_root: PathBuf::from(POWERCAP_ROOT),
		}
	}
}

impl SamplerConfig {
	pub fn new(interval_usec: u64, duration_sec: u64) -> Self {
		Self {
			interval: Duration::from_micros(interval_usec),
			duration: Duration::from_secs(duration_sec),
			..Self::default()
		}
	}

	pub fn interval_usec(&self) -> u64 {
		self.interval.as_micros() as u64
	}

	pub fn duration_sec(&self) -> u64 {
		self.duration.as_secs()
	}

	/// Adds a source at the end of the output order
	pub fn with_source(mut self, kind: SourceKind) -> Self {
		if !self.sources.contains(&kind) {
			self.sources.push(kind);
		}
		self
	}

	/// Rejects configurations the sampling loop cannot run
	pub fn validate(&self) -> Result<()> {
		if self.interval.is_zero() {
			return Err(SamplerError::invalid_config("interval must be greater than zero"));
		}
		if self.duration.is_zero() {
			return Err(SamplerError::invalid_config("duration must be greater than zero"));
		}
		if self.interval > self.duration {
			return Err(SamplerError::invalid_config(format!(
				"interval {:?} is longer than duration {:?}, no sample would be produced",
				self.interval, self.duration
			)));
		}
		if self.sources.is_empty() {
			return Err(SamplerError::invalid_config("no source enabled"));
		}
		for (i, kind) in self.sources.iter().enumerate() {
			if self.sources[..i].contains(kind) {
				return Err(SamplerError::invalid_config(format!("source {kind} enabled twice")));
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_is_valid() {
		let config = SamplerConfig::default();
		assert!(config.validate().is_ok());
		assert_eq!(config.interval_usec(), 1_000_000);
		assert_eq!(config.duration_sec(), 120);
	}

	#[test]
	fn zero_interval_or_duration_is_rejected() {
		assert!(matches!(
			SamplerConfig::new(0, 10).validate(),
			Err(SamplerError::InvalidConfig(_))
		));
		assert!(matches!(
			SamplerConfig::new(1_000_000, 0).validate(),
			Err(SamplerError::InvalidConfig(_))
		));
	}

	#[test]
	fn interval_longer_than_duration_is_rejected() {
		assert!(SamplerConfig::new(5_000_000, 3).validate().is_err());
		assert!(SamplerConfig::new(5_000_000, 5).validate().is_ok());
	}

	#[test]
	fn duplicate_and_empty_sources_are_rejected() {
		let mut config = SamplerConfig::new(1_000_000, 10);
		config.sources = vec![SourceKind::Package, SourceKind::Gpu, SourceKind::Gpu];
		assert!(config.validate().is_err());

		config.sources.clear();
		assert!(config.validate().is_err());
	}

	#[test]
	fn with_source_keeps_order_and_ignores_repeats() {
		let config = SamplerConfig::new(1_000_000, 10)
			.with_source(SourceKind::Bmc)
			.with_source(SourceKind::Dram)
			.with_source(SourceKind::Bmc);
		assert_eq!(config.sources, vec![SourceKind::Package, SourceKind::Bmc, SourceKind::Dram]);
	}

	#[test]
	fn only_package_is_mandatory() {
		assert!(SourceKind::Package.is_mandatory());
		assert!(!SourceKind::Dram.is_mandatory());
		assert!(!SourceKind::Gpu.is_mandatory());
		assert!(!SourceKind::Bmc.is_mandatory());
	}
}
