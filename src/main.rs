use std::io;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use energy_log::constants::{DEFAULT_DURATION_SECS, DEFAULT_INTERVAL_SECS, MICRO_PER_UNIT, POWERCAP_ROOT};
use energy_log::{PackageBackend, Result, SamplerConfig, SamplerError, SourceKind, TextSink};

/// Periodic CPU, DRAM, GPU and BMC power logger
#[derive(Parser, Debug)]
#[command(name = "energy-log", version, about)]
struct Cli {
	/// Sampling interval in seconds (fractions allowed)
	#[arg(short = 'i', long, default_value_t = DEFAULT_INTERVAL_SECS)]
	interval: f64,

	/// Total run time in seconds
	#[arg(short = 't', long, default_value_t = DEFAULT_DURATION_SECS)]
	duration: u64,

	/// Also log DRAM power of package 0
	#[arg(short = 'd', long)]
	dram: bool,

	/// Print energy per interval next to power
	#[arg(short = 'E', long)]
	energy: bool,

	/// Print a header line naming the columns
	#[arg(short = 'H', long)]
	header: bool,

	/// Prefix timestamps with month and day
	#[arg(short = 'D', long)]
	month_day: bool,

	/// Also log system power reported by the BMC over IPMI/DCMI
	#[arg(short = 'I', long)]
	ipmi: bool,

	/// Also log the total power of all NVIDIA GPUs
	#[arg(short = 'g', long)]
	gpu: bool,

	/// Like -g, plus one column per GPU
	#[arg(short = 'G', long)]
	gpu_each: bool,

	/// Read package energy from the RAPL MSR instead of powercap
	#[arg(long)]
	msr: bool,

	/// Root of the powercap sysfs tree
	#[arg(long, default_value = POWERCAP_ROOT)]
	powercap_root: PathBuf,
}

fn interval_from_secs(secs: f64) -> Result<Duration> {
	if !secs.is_finite() || secs <= 0.0 {
		return Err(SamplerError::invalid_config(format!("invalid interval: {secs}")));
	}

	let usec = (secs * MICRO_PER_UNIT).round();
	if usec < 1.0 || usec > u64::MAX as f64 {
		return Err(SamplerError::invalid_config(format!("invalid interval: {secs}")));
	}
	Ok(Duration::from_micros(usec as u64))
}

fn build_config(cli: &Cli) -> Result<SamplerConfig> {
	let mut config = SamplerConfig::new(0, cli.duration);
	config.interval = interval_from_secs(cli.interval)?;
	config.report_energy = cli.energy;
	config.per_device = cli.gpu_each;
	config.powercap_root = cli.powercap_root.clone();
	if cli.msr {
		config.package_backend = PackageBackend::Msr;
	}

	// Output order: CPU, DRAM, GPU, IPMI
	if cli.dram {
		config = config.with_source(SourceKind::Dram);
	}
	if cli.gpu || cli.gpu_each {
		config = config.with_source(SourceKind::Gpu);
	}
	if cli.ipmi {
		config = config.with_source(SourceKind::Bmc);
	}

	config.validate()?;
	Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
	let config = build_config(cli)?;

	let stdout = io::stdout();
	let mut sink = TextSink::new(stdout.lock(), config.report_energy)
		.with_headers(cli.header)
		.with_month_day(cli.month_day);

	let summary = energy_log::run(&config, &mut sink)?;
	info!("Wrote {} samples", summary.samples);
	Ok(())
}

fn main() {
	energy_log::init_logging();

	let cli = Cli::parse();
	if let Err(e) = run(&cli) {
		error!("{}", e);
		process::exit(1);
	}
}
