use std::fs;

use crate::constants::*;

/// Represents CPU manufacturer types that can be detected
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CpuType {
	/// Intel CPU architecture
	Intel,
	/// AMD CPU architecture
	Amd,
	/// Any other CPU architecture, no RAPL MSRs known
	Unsupported,
}

/// RAPL register addresses for one vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaplRegisters {
	pub unit: u32,
	pub package_energy: u32,
	/// Not every vendor exposes DRAM energy through an MSR
	pub dram_energy: Option<u32>,
}

impl CpuType {
	/// RAPL MSR layout for this vendor
	pub fn rapl_registers(&self) -> Option<RaplRegisters> {
		match self {
			CpuType::Intel => Some(RaplRegisters {
				unit: INTEL_POWER_UNIT_MSR,
				package_energy: INTEL_PKG_ENERGY_MSR,
				dram_energy: Some(INTEL_DRAM_ENERGY_MSR),
			}),
			CpuType::Amd => Some(RaplRegisters {
				unit: AMD_ENERGY_UNIT_MSR,
				package_energy: AMD_ENERGY_PKG_MSR,
				dram_energy: None,
			}),
			CpuType::Unsupported => None,
		}
	}
}

/// Identifies the vendor from the contents of /proc/cpuinfo
pub fn cpu_type_from_cpuinfo(cpuinfo: &str) -> CpuType {
	if cpuinfo.contains("GenuineIntel") {
		CpuType::Intel
	} else if cpuinfo.contains("AuthenticAMD") || cpuinfo.contains("HygonGenuine") {
		CpuType::Amd
	} else {
		CpuType::Unsupported
	}
}

/// Detects the CPU manufacturer by reading /proc/cpuinfo
pub fn detect_cpu_type() -> CpuType {
	let cpuinfo = fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
	cpu_type_from_cpuinfo(&cpuinfo)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn vendor_strings_map_to_cpu_types() {
		assert_eq!(cpu_type_from_cpuinfo("vendor_id\t: GenuineIntel\n"), CpuType::Intel);
		assert_eq!(cpu_type_from_cpuinfo("vendor_id\t: AuthenticAMD\n"), CpuType::Amd);
		assert_eq!(cpu_type_from_cpuinfo("CPU implementer\t: 0x41\n"), CpuType::Unsupported);
	}

	#[test]
	fn amd_has_no_dram_register() {
		let amd = CpuType::Amd.rapl_registers().unwrap();
		assert_eq!(amd.package_energy, AMD_ENERGY_PKG_MSR);
		assert_eq!(amd.dram_energy, None);

		let intel = CpuType::Intel.rapl_registers().unwrap();
		assert_eq!(intel.dram_energy, Some(INTEL_DRAM_ENERGY_MSR));
		assert!(CpuType::Unsupported.rapl_registers().is_none());
	}
}
