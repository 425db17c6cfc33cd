use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use crate::util::{duration_to_timespec, timespec_to_duration};

/// Time source used by the sampling loop
///
/// `now` and `sleep_until` work on a monotonic timeline measured from an
/// arbitrary fixed origin. `wall_now` is the realtime clock since the Unix
/// epoch and is only used for alignment.
pub trait Clock {
	fn now(&self) -> Duration;

	/// Blocks until the monotonic clock reaches `deadline`
	///
	/// Returns immediately if the deadline has already passed.
	fn sleep_until(&self, deadline: Duration);

	fn wall_now(&self) -> Duration;
}

/// CLOCK_MONOTONIC with absolute-deadline sleeps
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
	fn now(&self) -> Duration {
		let mut ts = libc::timespec {
			tv_sec: 0,
			tv_nsec: 0,
		};
		// SAFETY: clock_gettime only writes into the provided timespec
		if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) } != 0 {
			warn!("clock_gettime failed: {}", io::Error::last_os_error());
		}
		timespec_to_duration(&ts)
	}

	fn sleep_until(&self, deadline: Duration) {
		let ts = duration_to_timespec(deadline);
		loop {
			// SAFETY: ts is a valid timespec, the remaining-time pointer may be null for TIMER_ABSTIME
			let rc = unsafe {
				libc::clock_nanosleep(libc::CLOCK_MONOTONIC, libc::TIMER_ABSTIME, &ts, std::ptr::null_mut())
			};
			match rc {
				0 => return,
				// Interrupted by a signal, the absolute target is still valid
				libc::EINTR => continue,
				err => {
					warn!("clock_nanosleep failed: {}", io::Error::from_raw_os_error(err));
					return;
				},
			}
		}
	}

	fn wall_now(&self) -> Duration {
		SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
	}
}

const MINUTE_US: u128 = 60_000_000;

/// Delay from `wall_now` to the next aligned start
///
/// Intervals up to a minute align to multiples of the interval counted from
/// the start of the current minute, or to the next full minute if that comes
/// first. With a 5 s interval a run started at 12:00:03.4 waits 1.6 s and
/// first ticks on :05, :10, ... With 7 s, a run started at :58 waits for
/// :00. Longer intervals align to multiples counted from the Unix epoch.
/// This only affects where the timestamps land.
pub fn alignment_delay(wall_now: Duration, interval: Duration) -> Duration {
	let interval_us = interval.as_micros();
	if interval_us == 0 {
		return Duration::ZERO;
	}

	let delay_us = if interval_us <= MINUTE_US {
		let into_minute = wall_now.as_micros() % MINUTE_US;
		match into_minute % interval_us {
			0 => 0,
			rem => (interval_us - rem).min(MINUTE_US - into_minute),
		}
	} else {
		match wall_now.as_micros() % interval_us {
			0 => 0,
			rem => interval_us - rem,
		}
	};
	Duration::from_micros(delay_us as u64)
}

/// Immutable timing parameters of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
	pub interval: Duration,
	pub duration: Duration,
	/// Monotonic origin every deadline is computed from
	pub first_deadline: Duration,
}

impl Schedule {
	pub fn new(interval: Duration, duration: Duration, first_deadline: Duration) -> Self {
		Self {
			interval,
			duration,
			first_deadline,
		}
	}

	/// Number of complete intervals that fit in the run
	pub fn tick_count(&self) -> u64 {
		if self.interval.is_zero() {
			return 0;
		}
		(self.duration.as_nanos() / self.interval.as_nanos()) as u64
	}
}

/// Generates drift-free absolute wake-up instants
///
/// Deadlines are produced by adding the interval to the previous deadline,
/// never to the current time, so time spent inside a tick does not shift
/// later ticks.
#[derive(Debug, Clone)]
pub struct ClockAligner {
	schedule: Schedule,
	deadline: Duration,
	issued: u64,
}

impl ClockAligner {
	pub fn new(schedule: Schedule) -> Self {
		Self {
			schedule,
			deadline: schedule.first_deadline,
			issued: 0,
		}
	}

	/// Waits for wall-clock alignment and anchors a schedule on the monotonic clock
	pub fn start<C: Clock + ?Sized>(clock: &C, interval: Duration, duration: Duration) -> Self {
		let delay = alignment_delay(clock.wall_now(), interval);
		if !delay.is_zero() {
			debug!("Waiting {:?} to align with a {:?} boundary", delay, interval);
			clock.sleep_until(clock.now() + delay);
		}

		Self::new(Schedule::new(interval, duration, clock.now()))
	}

	pub fn schedule(&self) -> &Schedule {
		&self.schedule
	}

	/// Offset of the last issued deadline from the start of the run
	pub fn elapsed_from_start(&self) -> Duration {
		self.deadline - self.schedule.first_deadline
	}

	/// Number of deadlines issued so far
	pub fn issued(&self) -> u64 {
		self.issued
	}

	/// Commits to the next deadline, or `None` once the run is complete
	///
	/// A deadline is only issued if it still lies within the run duration, so
	/// a run yields `floor(duration / interval)` deadlines.
	pub fn advance(&mut self) -> Option<Duration> {
		let next_offset = self.elapsed_from_start() + self.schedule.interval;
		if self.schedule.interval.is_zero() || next_offset > self.schedule.duration {
			return None;
		}

		self.deadline += self.schedule.interval;
		self.issued += 1;
		Some(self.deadline)
	}
}
