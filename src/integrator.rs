use std::time::Duration;

use crate::energy::{EnergySourceKind, RawReading};
use crate::power::PowerEnergy;

/// Per-source memory of the last successful reading
///
/// One instance per active source, owned by the sampling loop. It is only
/// updated by [`integrate`], so a failed read leaves the baseline untouched.
#[derive(Debug, Clone, Default)]
pub struct SourceState {
	prior: Option<RawReading>,
}

impl SourceState {
	pub fn new() -> Self {
		Self { prior: None }
	}

	/// Whether a baseline reading has been recorded
	pub fn has_prior(&self) -> bool {
		self.prior.is_some()
	}

	pub fn last_raw_value(&self) -> Option<f64> {
		self.prior.map(|r| r.value)
	}

	pub fn last_timestamp(&self) -> Option<Duration> {
		self.prior.map(|r| r.captured_at)
	}
}

/// Outcome of feeding one reading into a source's state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Integrated {
	/// Reading stored as the new baseline, nothing to report yet
	Baseline,

	/// Power and energy for the interval ending at this reading
	Value(PowerEnergy),

	/// A cumulative counter went backwards (wrap or reset)
	///
	/// The raw delta is kept for reporting. The counter is re-baselined on the
	/// new reading, so the next interval is measured normally.
	CounterDecreased { delta_joules: f64 },
}

impl Integrated {
	pub fn value(&self) -> Option<PowerEnergy> {
		match self {
			Integrated::Value(v) => Some(*v),
			_ => None,
		}
	}
}

/// Turns a new reading plus the stored baseline into power and energy
///
/// Cumulative counters are differenced: `energy = now - prev`,
/// `power = energy / dt`. Instantaneous meters are integrated with the
/// trapezoidal rule: `energy = (prev + now) / 2 * dt`, `power = now`.
/// `dt` is the distance between the two capture timestamps.
pub fn integrate(state: &mut SourceState, reading: RawReading) -> Integrated {
	let Some(prior) = state.prior.replace(reading) else {
		return Integrated::Baseline;
	};

	debug_assert_eq!(prior.kind, reading.kind, "source kind changed between reads");

	let dt = match reading.captured_at.checked_sub(prior.captured_at) {
		Some(dt) if !dt.is_zero() => dt.as_secs_f64(),
		// Non-advancing timestamps cannot produce a rate
		_ => return Integrated::Baseline,
	};

	match reading.kind {
		EnergySourceKind::CumulativeCounter => {
			let energy = reading.value - prior.value;
			if energy < 0.0 {
				return Integrated::CounterDecreased { delta_joules: energy };
			}
			Integrated::Value(PowerEnergy::new(energy / dt, energy))
		},
		EnergySourceKind::InstantaneousPower => {
			let energy = (prior.value + reading.value) / 2.0 * dt;
			Integrated::Value(PowerEnergy::new(reading.value, energy))
		},
	}
}

/// Sums per-device values into one total
///
/// The total is only defined when every part produced a value this tick;
/// a partial sum would silently under-report.
pub fn aggregate(parts: &[Option<PowerEnergy>]) -> Option<PowerEnergy> {
	if parts.is_empty() {
		return None;
	}

	parts.iter().try_fold(PowerEnergy::new(0.0, 0.0), |acc, part| {
		part.map(|p| PowerEnergy::new(acc.power_watts + p.power_watts, acc.energy_joules + p.energy_joules))
	})
}
