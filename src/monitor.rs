use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use log::{debug, error, info, warn};

use crate::clock::{Clock, ClockAligner, Schedule};
use crate::config::SamplerConfig;
use crate::error::{Result, SamplerError};
use crate::integrator::{Integrated, SourceState, aggregate, integrate};
use crate::sample::{Reading, Sample, SampleEntry, SampleSink};
use crate::source::{EnergySource, OpenedSource, SourceSlot};

/// Lifecycle of a sampling run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
	Idle,
	Running,
	Stopped,
}

/// Counters describing how a run went
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
	/// Samples handed to the sink
	pub samples: u64,
	/// Optional-source reads that failed
	pub degraded_reads: u64,
	/// Reads rejected with a non-success status code
	pub soft_failures: u64,
	/// Counter decreases reported instead of a value
	pub anomalies: u64,
}

/// One source together with its integration state
struct Channel {
	label: String,
	mandatory: bool,
	source: Box<dyn EnergySource>,
	state: SourceState,
}

impl From<OpenedSource> for Channel {
	fn from(opened: OpenedSource) -> Self {
		Self {
			label: opened.label,
			mandatory: opened.mandatory,
			source: opened.source,
			state: SourceState::new(),
		}
	}
}

enum Slot {
	Single(Channel),
	Group {
		label: String,
		members: Vec<Channel>,
		show_members: bool,
	},
}

impl From<SourceSlot> for Slot {
	fn from(slot: SourceSlot) -> Self {
		match slot {
			SourceSlot::Single(opened) => Slot::Single(opened.into()),
			SourceSlot::Group {
				label,
				members,
				show_members,
			} => Slot::Group {
				label,
				members: members.into_iter().map(Channel::from).collect(),
				show_members,
			},
		}
	}
}

/// Result of polling one channel on one tick
#[derive(Debug, Clone, Copy, PartialEq)]
enum Poll {
	Read(Integrated),
	Missed,
}

/// Drives all configured sources on an aligned, drift-free schedule
///
/// The loop is single-threaded: each tick sleeps to an absolute deadline,
/// then reads every source in configuration order and emits one sample.
pub struct SamplingLoop<C: Clock> {
	clock: C,
	interval: Duration,
	duration: Duration,
	report_energy: bool,
	align_to_wall_clock: bool,
	slots: Vec<Slot>,
	labels: Vec<String>,
	state: LoopState,
	aligner: Option<ClockAligner>,
	summary: RunSummary,
}

impl<C: Clock> SamplingLoop<C> {
	/// Creates an idle loop over already opened sources
	pub fn new(config: &SamplerConfig, sources: Vec<SourceSlot>, clock: C) -> Result<Self> {
		config.validate()?;
		if sources.is_empty() {
			return Err(SamplerError::invalid_config("no source could be activated"));
		}

		let labels = sources.iter().flat_map(SourceSlot::labels).collect();

		Ok(Self {
			clock,
			interval: config.interval,
			duration: config.duration,
			report_energy: config.report_energy,
			align_to_wall_clock: config.align_to_wall_clock,
			slots: sources.into_iter().map(Slot::from).collect(),
			labels,
			state: LoopState::Idle,
			aligner: None,
			summary: RunSummary::default(),
		})
	}

	pub fn state(&self) -> LoopState {
		self.state
	}

	/// Entry labels of every sample, in order
	pub fn labels(&self) -> &[String] {
		&self.labels
	}

	pub fn summary(&self) -> RunSummary {
		self.summary
	}

	pub fn schedule(&self) -> Option<&Schedule> {
		self.aligner.as_ref().map(ClockAligner::schedule)
	}

	/// Runs the whole schedule, feeding every sample to `sink`
	///
	/// Sources are released when the run ends, whether it completed or
	/// aborted.
	pub fn run<S: SampleSink + ?Sized>(&mut self, sink: &mut S) -> Result<RunSummary> {
		let result = self.run_inner(sink);
		self.release();

		match &result {
			Ok(summary) => info!(
				"Sampling finished: {} samples, {} degraded reads, {} soft failures, {} counter anomalies",
				summary.samples, summary.degraded_reads, summary.soft_failures, summary.anomalies
			),
			Err(e) => error!("Sampling aborted: {}", e),
		}
		result
	}

	fn run_inner<S: SampleSink + ?Sized>(&mut self, sink: &mut S) -> Result<RunSummary> {
		self.start()?;
		sink.begin(&self.labels)?;

		while let Some(sample) = self.tick()? {
			if let Err(e) = sink.consume(&sample) {
				self.state = LoopState::Stopped;
				return Err(e);
			}
			self.summary.samples += 1;
		}

		sink.finish()?;
		Ok(self.summary)
	}

	/// Anchors the schedule and records a baseline for every source
	///
	/// The baseline read happens at the schedule origin, so the first tick
	/// already covers a full interval.
	pub fn start(&mut self) -> Result<()> {
		if self.state != LoopState::Idle {
			return Err(SamplerError::invalid_config("sampling loop already started"));
		}

		let aligner = if self.align_to_wall_clock {
			ClockAligner::start(&self.clock, self.interval, self.duration)
		} else {
			ClockAligner::new(Schedule::new(self.interval, self.duration, self.clock.now()))
		};
		info!(
			"Sampling {} source(s) every {:?} for {:?} ({} samples)",
			self.labels.len(),
			self.interval,
			self.duration,
			aligner.schedule().tick_count()
		);
		self.aligner = Some(aligner);
		self.state = LoopState::Running;

		if let Err(e) = self.poll_all() {
			self.state = LoopState::Stopped;
			return Err(e);
		}
		Ok(())
	}

	/// Performs one tick
	///
	/// Returns `Ok(None)` once the run duration is exhausted. A hard failure
	/// on a mandatory source stops the loop and is returned as an error.
	pub fn tick(&mut self) -> Result<Option<Sample>> {
		if self.state != LoopState::Running {
			return Ok(None);
		}

		let Some(aligner) = self.aligner.as_mut() else {
			return Ok(None);
		};
		let Some(deadline) = aligner.advance() else {
			debug!("Run duration reached after {} ticks", aligner.issued());
			self.state = LoopState::Stopped;
			return Ok(None);
		};
		let tick = aligner.issued();
		let elapsed = aligner.elapsed_from_start();

		self.clock.sleep_until(deadline);

		let polls = match self.poll_all() {
			Ok(polls) => polls,
			Err(e) => {
				self.state = LoopState::Stopped;
				return Err(e);
			},
		};

		let entries = self.assemble(polls);
		Ok(Some(Sample {
			tick,
			elapsed,
			wall_time: wall_time(self.clock.wall_now()),
			entries,
		}))
	}

	/// Reads every channel once, in slot order
	fn poll_all(&mut self) -> Result<Vec<Vec<Poll>>> {
		let clock = &self.clock;
		let summary = &mut self.summary;

		self.slots
			.iter_mut()
			.map(|slot| match slot {
				Slot::Single(channel) => Ok(vec![poll_channel(channel, clock, summary)?]),
				Slot::Group { members, .. } => members
					.iter_mut()
					.map(|channel| poll_channel(channel, clock, summary))
					.collect(),
			})
			.collect()
	}

	fn assemble(&mut self, polls: Vec<Vec<Poll>>) -> Vec<SampleEntry> {
		let report_energy = self.report_energy;
		let summary = &mut self.summary;
		let mut entries = Vec::with_capacity(self.labels.len());

		for (slot, slot_polls) in self.slots.iter().zip(polls) {
			match slot {
				Slot::Single(channel) => {
					let reading = to_reading(&channel.label, slot_polls[0], report_energy, summary);
					entries.push(SampleEntry {
						label: channel.label.clone(),
						reading,
					});
				},
				Slot::Group {
					label,
					members,
					show_members,
				} => {
					let values: Vec<_> = slot_polls
						.iter()
						.map(|poll| match poll {
							Poll::Read(integrated) => integrated.value(),
							Poll::Missed => None,
						})
						.collect();

					let total = match aggregate(&values) {
						Some(total) => Reading::measured(total, report_energy),
						None if slot_polls.contains(&Poll::Missed) => Reading::Absent,
						None => Reading::Pending,
					};
					entries.push(SampleEntry {
						label: label.clone(),
						reading: total,
					});

					for (channel, poll) in members.iter().zip(&slot_polls) {
						let reading = to_reading(&channel.label, *poll, report_energy, summary);
						if *show_members {
							entries.push(SampleEntry {
								label: channel.label.clone(),
								reading,
							});
						}
					}
				},
			}
		}

		entries
	}

	/// Drops every source, closing its OS handle
	fn release(&mut self) {
		if !self.slots.is_empty() {
			debug!("Releasing {} source slot(s)", self.slots.len());
		}
		self.slots.clear();
		self.state = LoopState::Stopped;
	}
}

/// Reads one channel and feeds the result into its integration state
///
/// Failed reads leave the state untouched so the next successful read is
/// differenced against the last good baseline.
fn poll_channel<C: Clock>(channel: &mut Channel, clock: &C, summary: &mut RunSummary) -> Result<Poll> {
	match channel.source.read(clock) {
		Ok(reading) => {
			debug!("{}: {:.6} {}", channel.label, reading.value, reading.kind.unit());
			Ok(Poll::Read(integrate(&mut channel.state, reading)))
		},
		Err(e) if e.is_soft() => {
			warn!("{}: no reading this tick ({})", channel.label, e);
			summary.soft_failures += 1;
			Ok(Poll::Missed)
		},
		Err(e) if channel.mandatory => {
			error!("{}: mandatory source failed ({})", channel.label, e);
			Err(e)
		},
		Err(e) => {
			warn!("{}: read failed, skipping this tick ({})", channel.label, e);
			summary.degraded_reads += 1;
			Ok(Poll::Missed)
		},
	}
}

fn to_reading(label: &str, poll: Poll, report_energy: bool, summary: &mut RunSummary) -> Reading {
	match poll {
		Poll::Missed => Reading::Absent,
		Poll::Read(Integrated::Baseline) => Reading::Pending,
		Poll::Read(Integrated::Value(value)) => Reading::measured(value, report_energy),
		Poll::Read(Integrated::CounterDecreased { delta_joules }) => {
			warn!("{} counter went backwards by {:.3} J, re-baselined", label, -delta_joules);
			summary.anomalies += 1;
			Reading::CounterWrap { delta_joules }
		},
	}
}

fn wall_time(since_epoch: Duration) -> DateTime<Local> {
	Local
		.timestamp_opt(since_epoch.as_secs() as i64, since_epoch.subsec_nanos())
		.single()
		.unwrap_or_else(Local::now)
}
