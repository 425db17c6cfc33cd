use std::fmt;
use std::time::Duration;

/// How a source reports energy
///
/// Fixed per source for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnergySourceKind {
	/// Running total in joules, differenced between reads
	CumulativeCounter,
	/// Current draw in watts, no running total
	InstantaneousPower,
}

impl EnergySourceKind {
	/// Unit of the raw value carried by a reading of this kind
	pub fn unit(&self) -> &'static str {
		match self {
			EnergySourceKind::CumulativeCounter => "J",
			EnergySourceKind::InstantaneousPower => "W",
		}
	}
}

impl fmt::Display for EnergySourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			EnergySourceKind::CumulativeCounter => write!(f, "cumulative counter"),
			EnergySourceKind::InstantaneousPower => write!(f, "instantaneous power"),
		}
	}
}

/// One raw value captured from a source
///
/// `value` is joules-to-date for cumulative counters and watts-now for
/// instantaneous meters. `captured_at` is a monotonic timestamp measured
/// from an arbitrary but fixed origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReading {
	pub kind: EnergySourceKind,
	pub value: f64,
	pub captured_at: Duration,
}

impl RawReading {
	pub fn new(kind: EnergySourceKind, value: f64, captured_at: Duration) -> Self {
		Self {
			kind,
			value,
			captured_at,
		}
	}

	pub fn counter(joules: f64, captured_at: Duration) -> Self {
		Self::new(EnergySourceKind::CumulativeCounter, joules, captured_at)
	}

	pub fn power(watts: f64, captured_at: Duration) -> Self {
		Self::new(EnergySourceKind::InstantaneousPower, watts, captured_at)
	}
}
