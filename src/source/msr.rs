use std::fmt::{self, Debug};

use log::debug;
use msru::{Accessor, Msr};

use crate::constants::MSR_ENERGY_COUNTER_MASK;
use crate::cpu_type::detect_cpu_type;
use crate::clock::Clock;
use crate::energy::{EnergySourceKind, RawReading};
use crate::error::{Result, SamplerError};
use crate::source::EnergySource;
use crate::util::msr::{energy_status_unit, read_msr};
use crate::util::raw_energy_to_joules;

/// RAPL energy status register read directly through the msr driver
///
/// The register is a 32-bit running total, scaled to joules with the energy
/// unit read once when the counter is opened. All reads go to CPU 0, which
/// belongs to package 0.
pub struct MsrCounter {
	name: String,
	register: Msr,
	energy_unit: u64,
}

impl Debug for MsrCounter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MsrCounter")
			.field("name", &self.name)
			.field("energy_unit", &self.energy_unit)
			.finish()
	}
}

impl MsrCounter {
	/// Opens the counter at `energy_msr`, scaled by the unit register `unit_msr`
	pub fn open<S: Into<String>>(name: S, unit_msr: u32, energy_msr: u32) -> Result<Self> {
		let name = name.into();
		let unit = read_msr(unit_msr, 0).map_err(|e| SamplerError::unavailable(&name, e))?;
		let register = Msr::new(energy_msr, 0).map_err(|e| SamplerError::unavailable(&name, e))?;

		let energy_unit = energy_status_unit(unit);
		debug!("Opened MSR counter {} at {:#x}, energy unit 2^-{} J", name, energy_msr, energy_unit);

		Ok(Self {
			name,
			register,
			energy_unit,
		})
	}

	/// Package energy status register for the detected vendor
	pub fn package() -> Result<Self> {
		let registers = detect_cpu_type()
			.rapl_registers()
			.ok_or_else(|| SamplerError::unavailable("package", "no RAPL MSRs on this CPU"))?;
		Self::open("package", registers.unit, registers.package_energy)
	}

	/// DRAM energy status register, only exposed on Intel
	pub fn dram() -> Result<Self> {
		let cpu_type = detect_cpu_type();
		let registers = cpu_type.rapl_registers();
		match registers.and_then(|r| r.dram_energy.map(|dram| (r.unit, dram))) {
			Some((unit, dram)) => Self::open("dram", unit, dram),
			None => Err(SamplerError::unavailable(
				"dram",
				format!("no DRAM energy MSR on {:?} CPUs", cpu_type),
			)),
		}
	}
}

impl EnergySource for MsrCounter {
	fn name(&self) -> &str {
		&self.name
	}

	fn kind(&self) -> EnergySourceKind {
		EnergySourceKind::CumulativeCounter
	}

	fn read(&mut self, clock: &dyn Clock) -> Result<RawReading> {
		let raw = self.register.read().map_err(|e| SamplerError::read_failure(&self.name, e))?;
		let joules = raw_energy_to_joules(raw & MSR_ENERGY_COUNTER_MASK, self.energy_unit);
		Ok(RawReading::counter(joules, clock.now()))
	}
}
