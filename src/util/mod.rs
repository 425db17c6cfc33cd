pub mod msr;

use std::time::Duration;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Converts a monotonic offset into a `timespec` for absolute clock calls
pub fn duration_to_timespec(d: Duration) -> libc::timespec {
	libc::timespec {
		tv_sec: d.as_secs() as libc::time_t,
		tv_nsec: d.subsec_nanos() as libc::c_long,
	}
}

/// Converts a `timespec` read from the kernel back into a `Duration`
///
/// Negative fields never come from CLOCK_MONOTONIC; they are clamped to zero.
pub fn timespec_to_duration(ts: &libc::timespec) -> Duration {
	let secs = u64::try_from(ts.tv_sec).unwrap_or(0);
	let nanos = u64::try_from(ts.tv_nsec).unwrap_or(0).min(NANOS_PER_SEC - 1);
	Duration::new(secs, nanos as u32)
}

/// Scales a raw RAPL register value into joules
///
/// # Arguments
///
/// * `raw` - Energy status register value
/// * `energy_unit` - Energy status unit from the unit MSR (power of 2)
///
/// # Returns
///
/// Energy in joules
pub fn raw_energy_to_joules(raw: u64, energy_unit: u64) -> f64 {
	raw as f64 / (1u64 << energy_unit) as f64
}
