pub mod dcmi;
pub mod msr;
#[cfg(feature = "nvml")]
pub mod nvml;
pub mod powercap;

use log::{info, warn};

use crate::clock::Clock;
use crate::config::{PackageBackend, SamplerConfig, SourceKind};
use crate::energy::{EnergySourceKind, RawReading};
use crate::error::Result;

/// A hardware counter or meter the sampling loop can poll
///
/// Opening happens in the implementor's constructor and the OS handle is
/// released on drop. Implementations keep no reading history; that lives in
/// the loop's per-source state.
pub trait EnergySource {
	/// Identity used in log messages
	fn name(&self) -> &str;

	fn kind(&self) -> EnergySourceKind;

	/// Performs one synchronous read, stamped with `clock` as soon as the
	/// hardware has answered
	///
	/// The value is joules-to-date for cumulative counters and watts for
	/// instantaneous meters.
	fn read(&mut self, clock: &dyn Clock) -> Result<RawReading>;
}

/// An opened source ready to be placed in a sample
pub struct OpenedSource {
	pub label: String,
	pub mandatory: bool,
	pub source: Box<dyn EnergySource>,
}

impl OpenedSource {
	pub fn new<S: Into<String>>(label: S, mandatory: bool, source: Box<dyn EnergySource>) -> Self {
		Self {
			label: label.into(),
			mandatory,
			source,
		}
	}
}

/// Position of one configured source in the sample layout
pub enum SourceSlot {
	/// One source, one entry
	Single(OpenedSource),

	/// Several devices summed into one total entry
	Group {
		label: String,
		members: Vec<OpenedSource>,
		show_members: bool,
	},
}

impl SourceSlot {
	/// Entry labels this slot contributes to every sample, in order
	pub fn labels(&self) -> Vec<String> {
		match self {
			SourceSlot::Single(source) => vec![source.label.clone()],
			SourceSlot::Group {
				label,
				members,
				show_members,
			} => {
				let mut labels = vec![label.clone()];
				if *show_members {
					labels.extend(members.iter().map(|m| m.label.clone()));
				}
				labels
			},
		}
	}
}

/// Opens every configured source in configuration order
///
/// A mandatory source that cannot be opened fails the whole call. Optional
/// sources that cannot be opened are logged and left out of the run.
pub fn open_sources(config: &SamplerConfig) -> Result<Vec<SourceSlot>> {
	let mut slots = Vec::with_capacity(config.sources.len());

	for &kind in &config.sources {
		match open_slot(kind, config) {
			Ok(slot) => {
				info!("Activated {} source ({})", kind, slot.labels().join(", "));
				slots.push(slot);
			},
			Err(e) if kind.is_mandatory() => return Err(e),
			Err(e) => warn!("Skipping {} source: {}", kind, e),
		}
	}

	Ok(slots)
}

fn open_slot(kind: SourceKind, config: &SamplerConfig) -> Result<SourceSlot> {
	let label = kind.label();
	let mandatory = kind.is_mandatory();

	let source: Box<dyn EnergySource> = match kind {
		SourceKind::Package => match config.package_backend {
			PackageBackend::Powercap => Box::new(powercap::PowercapCounter::package(&config.powercap_root)?),
			PackageBackend::Msr => Box::new(msr::MsrCounter::package()?),
		},
		SourceKind::Dram => match config.package_backend {
			PackageBackend::Powercap => Box::new(powercap::PowercapCounter::dram(&config.powercap_root)?),
			PackageBackend::Msr => Box::new(msr::MsrCounter::dram()?),
		},
		SourceKind::Bmc => Box::new(dcmi::DcmiPowerMeter::open()?),
		SourceKind::Gpu => return open_gpu_group(label, config.per_device),
	};

	Ok(SourceSlot::Single(OpenedSource::new(label, mandatory, source)))
}

#[cfg(feature = "nvml")]
fn open_gpu_group(label: &str, show_members: bool) -> Result<SourceSlot> {
	let members = nvml::open_gpu_meters()?
		.into_iter()
		.enumerate()
		.map(|(i, meter)| OpenedSource::new(format!("{label}{i:02}"), false, Box::new(meter)))
		.collect();

	Ok(SourceSlot::Group {
		label: label.to_string(),
		members,
		show_members,
	})
}

#[cfg(not(feature = "nvml"))]
fn open_gpu_group(label: &str, _show_members: bool) -> Result<SourceSlot> {
	Err(crate::error::SamplerError::unavailable(label, "built without the nvml feature"))
}
