use std::fs::{File, OpenOptions};
use std::io;
use std::mem;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::clock::Clock;
use crate::constants::*;
use crate::energy::{EnergySourceKind, RawReading};
use crate::error::{Result, SamplerError};
use crate::source::EnergySource;

// linux/ipmi.h
const IPMI_IOC_MAGIC: u8 = b'i';
const IPMI_SYSTEM_INTERFACE_ADDR_TYPE: libc::c_int = 0x0c;
const IPMI_BMC_CHANNEL: libc::c_short = 0x0f;
const IPMI_MAX_ADDR_SIZE: usize = 32;

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioc(dir: u32, nr: u8, size: usize) -> u32 {
	(dir << 30) | ((size as u32) << 16) | ((IPMI_IOC_MAGIC as u32) << 8) | nr as u32
}

const IPMICTL_RECEIVE_MSG_TRUNC: u32 = ioc(IOC_READ | IOC_WRITE, 11, mem::size_of::<IpmiRecv>());
const IPMICTL_SEND_COMMAND: u32 = ioc(IOC_READ, 13, mem::size_of::<IpmiReq>());

#[repr(C)]
struct IpmiSystemInterfaceAddr {
	addr_type: libc::c_int,
	channel: libc::c_short,
	lun: libc::c_uchar,
}

#[repr(C)]
struct IpmiAddr {
	addr_type: libc::c_int,
	channel: libc::c_short,
	data: [libc::c_char; IPMI_MAX_ADDR_SIZE],
}

#[repr(C)]
struct IpmiMsg {
	netfn: libc::c_uchar,
	cmd: libc::c_uchar,
	data_len: libc::c_ushort,
	data: *mut libc::c_uchar,
}

#[repr(C)]
struct IpmiReq {
	addr: *mut libc::c_uchar,
	addr_len: libc::c_uint,
	msgid: libc::c_long,
	msg: IpmiMsg,
}

#[repr(C)]
struct IpmiRecv {
	recv_type: libc::c_int,
	addr: *mut libc::c_uchar,
	addr_len: libc::c_uint,
	msgid: libc::c_long,
	msg: IpmiMsg,
}

/// Request/response channel to a management controller
///
/// `exchange` returns the raw response body; byte 0 is the IPMI completion
/// code.
pub trait IpmiTransport {
	fn exchange(&mut self, netfn: u8, cmd: u8, data: &[u8]) -> io::Result<Vec<u8>>;
}

/// The kernel IPMI character device talking to the local BMC
#[derive(Debug)]
pub struct IpmiDevice {
	file: File,
	path: PathBuf,
	next_msgid: libc::c_long,
}

impl IpmiDevice {
	/// Opens the first IPMI device node that exists
	pub fn open() -> Result<Self> {
		let mut last_err = None;
		for path in IPMI_DEVICE_PATHS {
			match Self::open_path(Path::new(path)) {
				Ok(device) => return Ok(device),
				Err(e) => last_err = Some(e),
			}
		}
		Err(SamplerError::unavailable(
			"bmc",
			last_err.map_or_else(|| "no IPMI device".to_string(), |e| e.to_string()),
		))
	}

	pub fn open_path(path: &Path) -> io::Result<Self> {
		let file = OpenOptions::new().read(true).write(true).open(path)?;
		info!("IPMI device found: {}", path.display());
		Ok(Self {
			file,
			path: path.to_path_buf(),
			next_msgid: 0,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn wait_readable(&self, timeout: Duration) -> io::Result<()> {
		let mut pfd = libc::pollfd {
			fd: self.file.as_raw_fd(),
			events: libc::POLLIN,
			revents: 0,
		};
		let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
		loop {
			// SAFETY: pfd is a single valid pollfd for the duration of the call
			let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
			match rc {
				0 => return Err(io::Error::new(io::ErrorKind::TimedOut, "no response from BMC")),
				n if n > 0 => return Ok(()),
				_ => {
					let err = io::Error::last_os_error();
					if err.kind() != io::ErrorKind::Interrupted {
						return Err(err);
					}
				},
			}
		}
	}
}

impl IpmiTransport for IpmiDevice {
	fn exchange(&mut self, netfn: u8, cmd: u8, data: &[u8]) -> io::Result<Vec<u8>> {
		let fd = self.file.as_raw_fd();
		let mut addr = IpmiSystemInterfaceAddr {
			addr_type: IPMI_SYSTEM_INTERFACE_ADDR_TYPE,
			channel: IPMI_BMC_CHANNEL,
			lun: 0,
		};
		let mut payload = data.to_vec();
		let msgid = self.next_msgid;
		self.next_msgid = self.next_msgid.wrapping_add(1);

		let mut req = IpmiReq {
			addr: (&mut addr as *mut IpmiSystemInterfaceAddr).cast(),
			addr_len: mem::size_of::<IpmiSystemInterfaceAddr>() as libc::c_uint,
			msgid,
			msg: IpmiMsg {
				netfn,
				cmd,
				data_len: payload.len() as libc::c_ushort,
				data: payload.as_mut_ptr(),
			},
		};

		// SAFETY: req and everything it points to outlive the call
		if unsafe { libc::ioctl(fd, IPMICTL_SEND_COMMAND as _, &mut req as *mut IpmiReq) } < 0 {
			return Err(io::Error::last_os_error());
		}

		let deadline = Instant::now() + Duration::from_millis(IPMI_RESPONSE_TIMEOUT_MS);
		await_reply(msgid, || {
			self.wait_readable(deadline.saturating_duration_since(Instant::now()))?;
			self.receive()
		})
	}
}

impl IpmiDevice {
	/// Dequeues the next reply, whichever request it answers
	fn receive(&self) -> io::Result<(libc::c_long, Vec<u8>)> {
		let mut recv_addr = IpmiAddr {
			addr_type: 0,
			channel: 0,
			data: [0; IPMI_MAX_ADDR_SIZE],
		};
		let mut response = vec![0u8; IPMI_MAX_RESPONSE_LEN];
		let mut recv = IpmiRecv {
			recv_type: 0,
			addr: (&mut recv_addr as *mut IpmiAddr).cast(),
			addr_len: mem::size_of::<IpmiAddr>() as libc::c_uint,
			msgid: 0,
			msg: IpmiMsg {
				netfn: 0,
				cmd: 0,
				data_len: response.len() as libc::c_ushort,
				data: response.as_mut_ptr(),
			},
		};

		// SAFETY: recv and its buffers outlive the call, data_len bounds the kernel write
		let rc = unsafe {
			libc::ioctl(
				self.file.as_raw_fd(),
				IPMICTL_RECEIVE_MSG_TRUNC as _,
				&mut recv as *mut IpmiRecv,
			)
		};
		if rc < 0 {
			let err = io::Error::last_os_error();
			// Truncated responses are still delivered
			if err.raw_os_error() != Some(libc::EMSGSIZE) {
				return Err(err);
			}
		}

		response.truncate(usize::from(recv.msg.data_len).min(IPMI_MAX_RESPONSE_LEN));
		Ok((recv.msgid, response))
	}
}

/// Pulls replies off the device until the one for `msgid` shows up
///
/// Replies to earlier requests that timed out stay queued on the device and
/// arrive first; they are dropped. The caller bounds the wait.
fn await_reply<F>(msgid: libc::c_long, mut receive: F) -> io::Result<Vec<u8>>
where
	F: FnMut() -> io::Result<(libc::c_long, Vec<u8>)>,
{
	loop {
		let (reply_id, body) = receive()?;
		if reply_id == msgid {
			return Ok(body);
		}
		debug!("Dropping stale IPMI reply for message {} (waiting for {})", reply_id, msgid);
	}
}

/// Decodes a DCMI "Get Power Reading" response into watts
///
/// A nonzero completion code is a soft failure: the BMC rejected this
/// request, the channel itself is fine.
pub fn parse_power_reading(source_name: &str, response: &[u8]) -> Result<u16> {
	let Some(&completion_code) = response.first() else {
		return Err(SamplerError::read_failure(source_name, "empty DCMI response"));
	};

	if completion_code != 0x00 {
		return Err(SamplerError::soft_status(source_name, completion_code));
	}

	if response.len() < DCMI_MIN_RESPONSE_LEN {
		return Err(SamplerError::read_failure(
			source_name,
			format!("DCMI response too short: {} bytes", response.len()),
		));
	}

	Ok(u16::from_le_bytes([response[2], response[3]]))
}

/// System power reported by the BMC through DCMI
#[derive(Debug)]
pub struct DcmiPowerMeter<T: IpmiTransport = IpmiDevice> {
	name: String,
	transport: T,
}

impl DcmiPowerMeter<IpmiDevice> {
	pub fn open() -> Result<Self> {
		Ok(Self::with_transport(IpmiDevice::open()?))
	}
}

impl<T: IpmiTransport> DcmiPowerMeter<T> {
	pub fn with_transport(transport: T) -> Self {
		Self {
			name: "bmc".to_string(),
			transport,
		}
	}
}

impl<T: IpmiTransport> EnergySource for DcmiPowerMeter<T> {
	fn name(&self) -> &str {
		&self.name
	}

	fn kind(&self) -> EnergySourceKind {
		EnergySourceKind::InstantaneousPower
	}

	fn read(&mut self, clock: &dyn Clock) -> Result<RawReading> {
		let request = [DCMI_GROUP_EXT, DCMI_SYSTEM_POWER_STATS, 0x00, 0x00];
		let response = self
			.transport
			.exchange(DCMI_NETFN, DCMI_GET_POWER_READING, &request)
			.map_err(|e| SamplerError::read_failure(&self.name, e))?;
		let captured_at = clock.now();

		let watts = parse_power_reading(&self.name, &response)?;
		debug!("BMC power reading: {} W", watts);
		Ok(RawReading::power(f64::from(watts), captured_at))
	}
}
