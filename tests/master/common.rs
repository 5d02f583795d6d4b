use spimux::spi::{
    Bus, BusConfig, BusFlags, HostId, LoopbackHardware, SpiMaster, WireProbe,
};

pub const MOSI: u8 = 23;
pub const MISO: u8 = 19;
pub const SCLK: u8 = 18;
pub const CS_A: u8 = 5;
pub const CS_B: u8 = 4;

/// MOSI jumpered to MISO on the same GPIO, as on the loopback test rig.
pub fn rig_config() -> BusConfig {
    BusConfig::default()
        .with_pins(Some(MOSI), Some(MOSI), Some(SCLK))
        .with_flags(BusFlags::SHARED_PINS)
}

pub fn loopback_bus(master: &SpiMaster, host: HostId, config: BusConfig) -> (Bus, WireProbe) {
    let hardware = LoopbackHardware::new();
    let probe = hardware.probe();
    let bus = master
        .initialize(host, config, hardware)
        .expect("initialize loopback bus");
    (bus, probe)
}

/// Deterministic, non-repeating-per-seed byte pattern.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|index| (index as u8).wrapping_mul(31).wrapping_add(seed) ^ (index >> 8) as u8)
        .collect()
}
