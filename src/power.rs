/// Power and energy derived for one source over one interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerEnergy {
	/// Power in watts
	pub power_watts: f64,

	/// Energy in joules consumed over the interval
	pub energy_joules: f64,
}

impl PowerEnergy {
	pub fn new(power_watts: f64, energy_joules: f64) -> Self {
		Self {
			power_watts,
			energy_joules,
		}
	}
}
