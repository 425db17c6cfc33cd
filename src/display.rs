use std::io::Write;

use crate::error::{Result, SamplerError};
use crate::sample::{Reading, Sample, SampleSink};

/// Plain text sink: one whitespace-separated line per sample
///
/// Every line has the same number of columns. Missing values print as `-`
/// and counter anomalies as `wrap`, never as zero.
pub struct TextSink<W: Write> {
	out: W,
	show_headers: bool,
	show_month_day: bool,
	show_energy: bool,
}

impl<W: Write> TextSink<W> {
	pub fn new(out: W, show_energy: bool) -> Self {
		Self {
			out,
			show_headers: false,
			show_month_day: false,
			show_energy,
		}
	}

	pub fn with_headers(mut self, show: bool) -> Self {
		self.show_headers = show;
		self
	}

	pub fn with_month_day(mut self, show: bool) -> Self {
		self.show_month_day = show;
		self
	}

	pub fn into_inner(self) -> W {
		self.out
	}

	fn time_format(&self) -> &'static str {
		if self.show_month_day { "%m-%d %H:%M:%S" } else { "%H:%M:%S" }
	}

	fn write_line(&mut self, line: &str) -> Result<()> {
		writeln!(self.out, "{line}")
			.and_then(|_| self.out.flush())
			.map_err(|e| SamplerError::sink(e.to_string()))
	}
}

/// Formats the power and, when enabled, energy columns of one entry
fn push_columns(line: &mut String, reading: &Reading, show_energy: bool) {
	let (power, energy) = match reading {
		Reading::Measured {
			power_watts,
			energy_joules,
		} => (
			format!("{power_watts:.3}"),
			energy_joules.map_or_else(|| "-".to_string(), |e| format!("{e:.3}")),
		),
		Reading::CounterWrap { .. } => ("wrap".to_string(), "wrap".to_string()),
		Reading::Pending | Reading::Absent => ("-".to_string(), "-".to_string()),
	};

	line.push(' ');
	line.push_str(&power);
	if show_energy {
		line.push(' ');
		line.push_str(&energy);
	}
}

impl<W: Write> SampleSink for TextSink<W> {
	fn begin(&mut self, labels: &[String]) -> Result<()> {
		if !self.show_headers {
			return Ok(());
		}

		let mut line = String::from("#");
		if self.show_month_day {
			line.push_str(" mm-dd");
		}
		line.push_str(" HH:MM:ss");
		for label in labels {
			line.push_str(&format!(" {label}(W)"));
			if self.show_energy {
				line.push_str(&format!(" {label}(J)"));
			}
		}
		self.write_line(&line)
	}

	fn consume(&mut self, sample: &Sample) -> Result<()> {
		let mut line = sample.wall_time.format(self.time_format()).to_string();
		for entry in &sample.entries {
			push_columns(&mut line, &entry.reading, self.show_energy);
		}
		self.write_line(&line)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sample::SampleEntry;
	use chrono::{Local, TimeZone};
	use std::time::Duration;

	fn sample(entries: Vec<(&str, Reading)>) -> Sample {
		Sample {
			tick: 1,
			elapsed: Duration::from_secs(1),
			wall_time: Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 10).unwrap(),
			entries: entries
				.into_iter()
				.map(|(label, reading)| SampleEntry {
					label: label.to_string(),
					reading,
				})
				.collect(),
		}
	}

	fn render(sink: TextSink<Vec<u8>>) -> String {
		String::from_utf8(sink.into_inner()).unwrap()
	}

	#[test]
	fn header_lists_power_and_energy_columns() {
		let mut sink = TextSink::new(Vec::new(), true).with_headers(true).with_month_day(true);
		sink.begin(&["CPU".to_string(), "GPU".to_string()]).unwrap();
		assert_eq!(render(sink), "# mm-dd HH:MM:ss CPU(W) CPU(J) GPU(W) GPU(J)\n");
	}

	#[test]
	fn header_is_skipped_unless_enabled() {
		let mut sink = TextSink::new(Vec::new(), false);
		sink.begin(&["CPU".to_string()]).unwrap();
		assert_eq!(render(sink), "");
	}

	#[test]
	fn measured_values_use_three_decimals() {
		let mut sink = TextSink::new(Vec::new(), true);
		sink.consume(&sample(vec![(
			"CPU",
			Reading::Measured {
				power_watts: 12.34567,
				energy_joules: Some(61.7),
			},
		)]))
		.unwrap();
		assert_eq!(render(sink), "14:05:10 12.346 61.700\n");
	}

	#[test]
	fn absent_values_keep_their_columns() {
		let mut sink = TextSink::new(Vec::new(), true).with_month_day(true);
		sink.consume(&sample(vec![
			("CPU", Reading::Measured {
				power_watts: 1.0,
				energy_joules: Some(1.0),
			}),
			("IPMI", Reading::Absent),
			("DRAM", Reading::CounterWrap { delta_joules: -9.0 }),
		]))
		.unwrap();
		assert_eq!(render(sink), "03-09 14:05:10 1.000 1.000 - - wrap wrap\n");
	}

	#[test]
	fn power_only_when_energy_disabled() {
		let mut sink = TextSink::new(Vec::new(), false);
		sink.consume(&sample(vec![
			("CPU", Reading::Measured {
				power_watts: 20.0,
				energy_joules: None,
			}),
			("GPU", Reading::Pending),
		]))
		.unwrap();
		assert_eq!(render(sink), "14:05:10 20.000 -\n");
	}
}
