use std::time::Duration;

use chrono::{DateTime, Local};

use crate::error::Result;
use crate::power::PowerEnergy;

/// What one source contributed to one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
	/// No baseline yet, nothing to report
	Pending,

	/// The read failed or the backend reported a non-success status
	Absent,

	Measured {
		power_watts: f64,
		/// Only present when energy reporting is enabled
		energy_joules: Option<f64>,
	},

	/// A cumulative counter decreased; the raw delta is reported as-is
	CounterWrap { delta_joules: f64 },
}

impl Reading {
	pub fn measured(value: PowerEnergy, report_energy: bool) -> Self {
		Reading::Measured {
			power_watts: value.power_watts,
			energy_joules: report_energy.then_some(value.energy_joules),
		}
	}

	pub fn power_watts(&self) -> Option<f64> {
		match self {
			Reading::Measured { power_watts, .. } => Some(*power_watts),
			_ => None,
		}
	}

	pub fn energy_joules(&self) -> Option<f64> {
		match self {
			Reading::Measured { energy_joules, .. } => *energy_joules,
			_ => None,
		}
	}

	pub fn is_measured(&self) -> bool {
		matches!(self, Reading::Measured { .. })
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleEntry {
	pub label: String,
	pub reading: Reading,
}

/// One tick's readings across all active sources
#[derive(Debug, Clone)]
pub struct Sample {
	/// 1-based tick number
	pub tick: u64,

	/// Offset of this tick's deadline from the start of the run
	pub elapsed: Duration,

	pub wall_time: DateTime<Local>,

	/// One entry per active source, in configuration order
	pub entries: Vec<SampleEntry>,
}

impl Sample {
	pub fn get(&self, label: &str) -> Option<&Reading> {
		self.entries.iter().find(|e| e.label == label).map(|e| &e.reading)
	}

	pub fn labels(&self) -> impl Iterator<Item = &str> {
		self.entries.iter().map(|e| e.label.as_str())
	}
}

/// Consumer of the sample stream
///
/// Samples arrive in chronological order, one per tick. The loop blocks
/// while the sink works, so a slow sink delays sampling.
pub trait SampleSink {
	/// Called once before the first sample with the entry labels
	fn begin(&mut self, _labels: &[String]) -> Result<()> {
		Ok(())
	}

	fn consume(&mut self, sample: &Sample) -> Result<()>;

	fn finish(&mut self) -> Result<()> {
		Ok(())
	}
}

/// Collects samples in memory
impl SampleSink for Vec<Sample> {
	fn consume(&mut self, sample: &Sample) -> Result<()> {
		self.push(sample.clone());
		Ok(())
	}
}
