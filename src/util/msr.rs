use msru::{Accessor, Msr};
use std::io;

/// Reads a value from a Model-Specific Register (MSR)
///
/// # Arguments
///
/// * `msr_address` - The address of the MSR to read
/// * `cpu_id` - The CPU ID to read the MSR from
///
/// # Returns
///
/// The value read from the MSR, or an io::Error if the read fails
pub fn read_msr(msr_address: u32, cpu_id: u16) -> io::Result<u64> {
	Msr::new(msr_address, cpu_id).map_err(io::Error::other)?.read().map_err(io::Error::other)
}

/// Extracts the energy status unit (bits 12:8) from a RAPL power unit register
pub const fn energy_status_unit(unit_msr: u64) -> u64 {
	(unit_msr >> 8) & 0x1F
}
