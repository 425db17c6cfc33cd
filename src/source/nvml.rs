use std::fmt::{self, Debug};
use std::rc::Rc;

use log::{debug, info};
use nvml_wrapper::Nvml;

use crate::constants::MILLI_PER_UNIT;
use crate::clock::Clock;
use crate::energy::{EnergySourceKind, RawReading};
use crate::error::{Result, SamplerError};
use crate::source::EnergySource;

/// Board power of one NVIDIA GPU, read through NVML
///
/// All meters opened together share one NVML session, which is shut down
/// when the last of them is dropped.
pub struct NvmlGpuMeter {
	name: String,
	index: u32,
	nvml: Rc<Nvml>,
}

impl Debug for NvmlGpuMeter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("NvmlGpuMeter")
			.field("name", &self.name)
			.field("index", &self.index)
			.finish()
	}
}

/// Initializes NVML and opens one meter per visible device
pub fn open_gpu_meters() -> Result<Vec<NvmlGpuMeter>> {
	let nvml = Nvml::init().map_err(|e| SamplerError::unavailable("gpu", format!("NVML init failed: {e}")))?;
	let count = nvml
		.device_count()
		.map_err(|e| SamplerError::unavailable("gpu", format!("NVML device count failed: {e}")))?;

	if count == 0 {
		return Err(SamplerError::unavailable("gpu", "no NVIDIA GPUs found"));
	}

	// Fail early on devices that cannot be addressed at all
	for index in 0..count {
		let device = nvml
			.device_by_index(index)
			.map_err(|e| SamplerError::unavailable(format!("gpu{index}"), e))?;
		debug!("GPU {}: {}", index, device.name().unwrap_or_else(|_| "unknown".into()));
	}

	info!("Found {} NVIDIA GPU(s)", count);

	let nvml = Rc::new(nvml);
	Ok((0..count)
		.map(|index| NvmlGpuMeter {
			name: format!("gpu{index}"),
			index,
			nvml: Rc::clone(&nvml),
		})
		.collect())
}

impl EnergySource for NvmlGpuMeter {
	fn name(&self) -> &str {
		&self.name
	}

	fn kind(&self) -> EnergySourceKind {
		EnergySourceKind::InstantaneousPower
	}

	fn read(&mut self, clock: &dyn Clock) -> Result<RawReading> {
		// `Device` borrows the `Nvml` it came from and cannot be stored next to
		// the shared `Rc<Nvml>`, so the handle is looked up again. Only
		// `power_usage` samples the sensor.
		let milliwatts = self
			.nvml
			.device_by_index(self.index)
			.and_then(|device| device.power_usage())
			.map_err(|e| SamplerError::read_failure(&self.name, e))?;

		Ok(RawReading::power(f64::from(milliwatts) / MILLI_PER_UNIT, clock.now()))
	}
}
