use std::fs::{self, File};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::debug;

use crate::constants::{
	MICRO_PER_UNIT, POWERCAP_DRAM_ZONE_NAME, POWERCAP_ENERGY_FILE, POWERCAP_PKG0_ZONE,
};
use crate::clock::Clock;
use crate::energy::{EnergySourceKind, RawReading};
use crate::error::{Result, SamplerError};
use crate::source::EnergySource;

const READ_BUF_LEN: usize = 64;

/// Cumulative RAPL energy counter exposed as a powercap `energy_uj` file
///
/// The file descriptor is opened once and re-read from offset 0 on every
/// sample.
#[derive(Debug)]
pub struct PowercapCounter {
	name: String,
	path: PathBuf,
	file: File,
}

impl PowercapCounter {
	/// Opens an `energy_uj` file
	pub fn open<S: Into<String>>(name: S, path: &Path) -> Result<Self> {
		let name = name.into();
		let file = File::open(path)
			.map_err(|e| SamplerError::unavailable(&name, format!("failed to open {}: {e}", path.display())))?;

		debug!("Opened powercap counter {} at {}", name, path.display());
		Ok(Self {
			name,
			path: path.to_path_buf(),
			file,
		})
	}

	/// Package 0 energy counter under `root`
	pub fn package(root: &Path) -> Result<Self> {
		Self::open("package", &root.join(POWERCAP_PKG0_ZONE).join(POWERCAP_ENERGY_FILE))
	}

	/// DRAM energy counter of package 0 under `root`
	pub fn dram(root: &Path) -> Result<Self> {
		let zone = find_subzone(root, POWERCAP_PKG0_ZONE, POWERCAP_DRAM_ZONE_NAME)?;
		Self::open("dram", &zone.join(POWERCAP_ENERGY_FILE))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl EnergySource for PowercapCounter {
	fn name(&self) -> &str {
		&self.name
	}

	fn kind(&self) -> EnergySourceKind {
		EnergySourceKind::CumulativeCounter
	}

	fn read(&mut self, clock: &dyn Clock) -> Result<RawReading> {
		let mut buf = [0u8; READ_BUF_LEN];
		let n = self
			.file
			.read_at(&mut buf, 0)
			.map_err(|e| SamplerError::read_failure(&self.name, e))?;
		let captured_at = clock.now();

		let text = std::str::from_utf8(&buf[..n]).map_err(|e| SamplerError::read_failure(&self.name, e))?;
		let energy_uj = parse_energy_uj(text)
			.ok_or_else(|| SamplerError::read_failure(&self.name, format!("malformed counter value {:?}", text.trim())))?;

		Ok(RawReading::counter(energy_uj as f64 / MICRO_PER_UNIT, captured_at))
	}
}

/// Parses the decimal microjoule count of an `energy_uj` file
pub fn parse_energy_uj(text: &str) -> Option<u64> {
	text.trim().parse().ok()
}

/// Finds the subzone of `parent` whose `name` file reads `zone_name`
///
/// Subzones are the `<parent>:N` entries next to the parent zone, searched in
/// index order.
pub fn find_subzone(root: &Path, parent: &str, zone_name: &str) -> Result<PathBuf> {
	let prefix = format!("{parent}:");
	let entries = fs::read_dir(root).map_err(|e| SamplerError::unavailable(zone_name, e))?;

	let mut subzones: Vec<(usize, PathBuf)> = entries
		.filter_map(|entry| entry.ok())
		.filter_map(|entry| {
			let file_name = entry.file_name();
			let index = file_name.to_str()?.strip_prefix(&prefix)?.parse::<usize>().ok()?;
			Some((index, entry.path()))
		})
		.collect();
	subzones.sort_by_key(|&(index, _)| index);

	subzones
		.into_iter()
		.map(|(_, path)| path)
		.find(|path| {
			fs::read_to_string(path.join("name"))
				.map(|name| name.trim() == zone_name)
				.unwrap_or(false)
		})
		.ok_or_else(|| SamplerError::unavailable(zone_name, format!("no {zone_name} subzone under {parent}")))
}
