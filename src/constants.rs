// AMD RAPL MSR addresses
pub const AMD_ENERGY_UNIT_MSR: u32 = 0xC001_0299;
pub const AMD_ENERGY_PKG_MSR: u32 = 0xC001_029B;

// Intel RAPL MSR addresses
pub const INTEL_POWER_UNIT_MSR: u32 = 0x606;
pub const INTEL_PKG_ENERGY_MSR: u32 = 0x611;
pub const INTEL_DRAM_ENERGY_MSR: u32 = 0x619;

// RAPL energy status registers are 32 bits wide
pub const MSR_ENERGY_COUNTER_MASK: u64 = 0xFFFF_FFFF;

// Powercap sysfs layout
pub const POWERCAP_ROOT: &str = "/sys/class/powercap";
pub const POWERCAP_PKG0_ZONE: &str = "intel-rapl:0";
pub const POWERCAP_ENERGY_FILE: &str = "energy_uj";
pub const POWERCAP_DRAM_ZONE_NAME: &str = "dram";

// IPMI character device candidates, probed in order
pub const IPMI_DEVICE_PATHS: [&str; 3] = ["/dev/ipmi0", "/dev/ipmi/0", "/dev/ipmidev/0"];

// DCMI "Get Power Reading"
pub const DCMI_NETFN: u8 = 0x2C;
pub const DCMI_GET_POWER_READING: u8 = 0x02;
pub const DCMI_GROUP_EXT: u8 = 0xDC;
pub const DCMI_SYSTEM_POWER_STATS: u8 = 0x01;
pub const DCMI_MIN_RESPONSE_LEN: usize = 16;
pub const IPMI_RESPONSE_TIMEOUT_MS: u64 = 1000;
pub const IPMI_MAX_RESPONSE_LEN: usize = 256;

// Sampling defaults
pub const DEFAULT_INTERVAL_SECS: f64 = 1.0;
pub const DEFAULT_DURATION_SECS: u64 = 120;

pub const MICRO_PER_UNIT: f64 = 1_000_000.0;
pub const MILLI_PER_UNIT: f64 = 1_000.0;
