use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use energy_log::clock::Clock;
use energy_log::source::dcmi::{DcmiPowerMeter, IpmiTransport};
use energy_log::source::{OpenedSource, SourceSlot, open_sources};
use energy_log::{LoopState, Reading, Sample, SamplerConfig, SamplingLoop, SourceKind, TextSink};

/// Simulated clock; every sleep may rewrite one sysfs file first
#[derive(Default)]
struct FakeClock {
	mono: Cell<Duration>,
	wall: Cell<Duration>,
	on_sleep: RefCell<VecDeque<(PathBuf, String)>>,
}

impl FakeClock {
	fn at(mono: Duration, wall: Duration) -> Self {
		Self {
			mono: Cell::new(mono),
			wall: Cell::new(wall),
			..Self::default()
		}
	}

	fn then_write(&self, path: &Path, contents: &str) {
		self.on_sleep
			.borrow_mut()
			.push_back((path.to_path_buf(), contents.to_string()));
	}
}

impl Clock for &FakeClock {
	fn now(&self) -> Duration {
		self.mono.get()
	}

	fn sleep_until(&self, deadline: Duration) {
		let now = self.mono.get();
		if deadline > now {
			self.mono.set(deadline);
			self.wall.set(self.wall.get() + (deadline - now));
		}
		if let Some((path, contents)) = self.on_sleep.borrow_mut().pop_front() {
			fs::write(path, contents).unwrap();
		}
	}

	fn wall_now(&self) -> Duration {
		self.wall.get()
	}
}

#[derive(Default)]
struct ScriptedBmc {
	responses: VecDeque<Vec<u8>>,
}

impl ScriptedBmc {
	fn watts(mut self, watts: u16) -> Self {
		let mut resp = vec![0u8; 16];
		resp[1] = 0xDC;
		resp[2..4].copy_from_slice(&watts.to_le_bytes());
		self.responses.push_back(resp);
		self
	}

	fn completion_code(mut self, code: u8) -> Self {
		self.responses.push_back(vec![code]);
		self
	}
}

impl IpmiTransport for ScriptedBmc {
	fn exchange(&mut self, _netfn: u8, _cmd: u8, _data: &[u8]) -> io::Result<Vec<u8>> {
		self.responses
			.pop_front()
			.ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "BMC did not answer"))
	}
}

/// Builds `<root>/intel-rapl:0` and its `dram` subzone
fn powercap_tree(root: &Path, package_uj: u64, dram_uj: u64) -> (PathBuf, PathBuf) {
	let package = root.join("intel-rapl:0");
	let dram = root.join("intel-rapl:0:0");
	fs::create_dir_all(&package).unwrap();
	fs::create_dir_all(&dram).unwrap();
	fs::write(package.join("energy_uj"), format!("{package_uj}\n")).unwrap();
	fs::write(dram.join("name"), "dram\n").unwrap();
	fs::write(dram.join("energy_uj"), format!("{dram_uj}\n")).unwrap();
	(package.join("energy_uj"), dram.join("energy_uj"))
}

fn config(interval_secs: u64, duration_secs: u64, root: &Path) -> SamplerConfig {
	let mut config = SamplerConfig::new(interval_secs * 1_000_000, duration_secs);
	config.report_energy = true;
	config.align_to_wall_clock = false;
	config.powercap_root = root.to_path_buf();
	config
}

fn assert_measured(reading: Option<&Reading>, power: f64, energy: f64) {
	match reading {
		Some(Reading::Measured {
			power_watts,
			energy_joules: Some(energy_joules),
		}) => {
			assert!((power_watts - power).abs() < 1e-9, "power {power_watts} != {power}");
			assert!((energy_joules - energy).abs() < 1e-9, "energy {energy_joules} != {energy}");
		},
		other => panic!("expected a measured reading, got {other:?}"),
	}
}

#[test]
fn powercap_package_and_dram_over_three_ticks() {
	let dir = tempfile::tempdir().unwrap();
	let (package, dram) = powercap_tree(dir.path(), 100_000_000, 5_000_000);
	let clock = FakeClock::at(Duration::from_secs(50), Duration::from_secs(1_700_000_000));

	let config = config(1, 3, dir.path()).with_source(SourceKind::Dram);
	let sources = open_sources(&config).unwrap();
	assert_eq!(sources.iter().flat_map(SourceSlot::labels).collect::<Vec<_>>(), vec!["CPU", "DRAM"]);

	// One file is rewritten per sleep, before that tick reads the counters
	clock.then_write(&package, "110000000\n");
	clock.then_write(&dram, "7000000\n");
	clock.then_write(&package, "125000000\n");

	let mut sampler = SamplingLoop::new(&config, sources, &clock).unwrap();
	let mut samples: Vec<Sample> = Vec::new();
	let summary = sampler.run(&mut samples).unwrap();

	assert_eq!(summary.samples, 3);
	assert_eq!(sampler.state(), LoopState::Stopped);

	assert_measured(samples[0].get("CPU"), 10.0, 10.0);
	assert_measured(samples[0].get("DRAM"), 0.0, 0.0);
	assert_measured(samples[1].get("CPU"), 0.0, 0.0);
	assert_measured(samples[1].get("DRAM"), 2.0, 2.0);
	assert_measured(samples[2].get("CPU"), 15.0, 15.0);

	let ticks: Vec<_> = samples.iter().map(|s| (s.tick, s.elapsed.as_secs())).collect();
	assert_eq!(ticks, vec![(1, 1), (2, 2), (3, 3)]);
	assert_eq!((&clock).now(), Duration::from_secs(53));
}

#[test]
fn bmc_soft_failure_leaves_a_gap_and_keeps_the_baseline() {
	let dir = tempfile::tempdir().unwrap();
	let (package, _) = powercap_tree(dir.path(), 0, 0);
	let clock = FakeClock::at(Duration::from_secs(10), Duration::from_secs(1_700_000_000));

	// The BMC meter is scripted, everything else comes from the fake sysfs tree
	let config = config(1, 3, dir.path());
	let mut sources = open_sources(&config).unwrap();
	let bmc = ScriptedBmc::default().watts(200).watts(210).completion_code(0xD5).watts(220);
	sources.push(SourceSlot::Single(OpenedSource::new(
		"IPMI",
		false,
		Box::new(DcmiPowerMeter::with_transport(bmc)),
	)));

	for uj in ["1000000\n", "2000000\n", "3000000\n"] {
		clock.then_write(&package, uj);
	}

	let mut sampler = SamplingLoop::new(&config, sources, &clock).unwrap();
	let mut samples: Vec<Sample> = Vec::new();
	let summary = sampler.run(&mut samples).unwrap();

	assert_eq!(summary.samples, 3);
	assert_eq!(summary.soft_failures, 1);

	assert_measured(samples[0].get("IPMI"), 210.0, 205.0);
	assert_eq!(samples[1].get("IPMI"), Some(&Reading::Absent));
	// Integrated against the last good reading, two seconds earlier
	assert_measured(samples[2].get("IPMI"), 220.0, 430.0);

	for sample in &samples {
		assert_measured(sample.get("CPU"), 1.0, 1.0);
	}
}

#[test]
fn wall_clock_alignment_delays_the_first_deadline() {
	let dir = tempfile::tempdir().unwrap();
	powercap_tree(dir.path(), 0, 0);
	let clock = FakeClock::at(Duration::from_secs(10), Duration::from_millis(1_700_000_012_300));

	let mut config = config(1, 2, dir.path());
	config.align_to_wall_clock = true;
	let sources = open_sources(&config).unwrap();

	let mut sampler = SamplingLoop::new(&config, sources, &clock).unwrap();
	let mut samples: Vec<Sample> = Vec::new();
	sampler.run(&mut samples).unwrap();

	let stamps: Vec<_> = samples.iter().map(|s| s.wall_time.timestamp()).collect();
	assert_eq!(stamps, vec![1_700_000_014, 1_700_000_015]);
	assert!(samples.iter().all(|s| s.wall_time.timestamp_subsec_millis() == 0));
}

#[test]
fn text_output_keeps_one_column_pair_per_source() {
	let dir = tempfile::tempdir().unwrap();
	let (package, _) = powercap_tree(dir.path(), 0, 0);
	let clock = FakeClock::at(Duration::from_secs(1), Duration::from_secs(1_700_000_000));

	let config = config(1, 2, dir.path());
	let mut sources = open_sources(&config).unwrap();
	sources.push(SourceSlot::Single(OpenedSource::new(
		"IPMI",
		false,
		Box::new(DcmiPowerMeter::with_transport(ScriptedBmc::default().watts(100))),
	)));
	clock.then_write(&package, "4000000\n");
	clock.then_write(&package, "6000000\n");

	let mut sampler = SamplingLoop::new(&config, sources, &clock).unwrap();
	let mut sink = TextSink::new(Vec::new(), true).with_headers(true);
	sampler.run(&mut sink).unwrap();

	let text = String::from_utf8(sink.into_inner()).unwrap();
	let lines: Vec<_> = text.lines().collect();
	assert_eq!(lines[0], "# HH:MM:ss CPU(W) CPU(J) IPMI(W) IPMI(J)");

	let first: Vec<_> = lines[1].split_whitespace().collect();
	assert_eq!(&first[1..], ["4.000", "4.000", "-", "-"]);
	let second: Vec<_> = lines[2].split_whitespace().collect();
	assert_eq!(&second[1..], ["2.000", "2.000", "-", "-"]);
}

#[test]
fn unreadable_package_counter_stops_the_run() {
	let dir = tempfile::tempdir().unwrap();
	let (package, _) = powercap_tree(dir.path(), 0, 0);
	let clock = FakeClock::at(Duration::from_secs(1), Duration::from_secs(1_700_000_000));

	let config = config(1, 5, dir.path());
	let sources = open_sources(&config).unwrap();
	clock.then_write(&package, "1000000\n");
	clock.then_write(&package, "garbage\n");

	let mut sampler = SamplingLoop::new(&config, sources, &clock).unwrap();
	let mut samples: Vec<Sample> = Vec::new();
	assert!(sampler.run(&mut samples).is_err());

	assert_eq!(samples.len(), 1);
	assert_eq!(sampler.state(), LoopState::Stopped);
}
