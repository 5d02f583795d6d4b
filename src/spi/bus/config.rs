//! Bus and device configuration records. Both are plain data with builder
//! helpers; validation happens when the registry consumes them.
use std::{fmt, sync::Arc};

use bitflags::bitflags;

use crate::spi::{
    bits::{BitOrder, FieldLayout},
    clock::{APB_CLK_HZ, DEFAULT_DUTY_CYCLE},
    transaction::Transaction,
};

use super::error::{SpiError, SpiResult};

/// Highest GPIO number on the part.
pub const MAX_GPIO: u8 = 39;
/// GPIOs from this number up are input-only.
pub const FIRST_INPUT_ONLY_GPIO: u8 = 34;
/// Largest chunk a single DMA descriptor can move.
pub const DMA_DESCRIPTOR_MAX_BYTES: usize = 4092;
/// Payloads shorter than this skip DMA and go through the FIFO.
pub const DEFAULT_DMA_THRESHOLD_BYTES: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HostId {
    /// Wired to the flash chip; never handed out.
    Spi,
    Hspi,
    Vspi,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PinRole {
    Mosi,
    Miso,
    Sclk,
    QuadWp,
    QuadHd,
    ChipSelect,
}

impl PinRole {
    pub fn is_output(self) -> bool {
        !matches!(self, PinRole::Miso)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct BusFlags: u32 {
        /// Allow one GPIO to carry several bus roles (e.g. MOSI looped to MISO).
        const SHARED_PINS = 0b1;
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BusConfig {
    pub mosi: Option<u8>,
    pub miso: Option<u8>,
    pub sclk: Option<u8>,
    pub quadwp: Option<u8>,
    pub quadhd: Option<u8>,
    pub dma: bool,
    /// Largest chunk moved by one hardware descriptor; longer payloads are chained.
    pub max_transfer_sz: usize,
    pub dma_threshold: usize,
    pub base_clock_hz: u32,
    pub flags: BusFlags,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mosi: None,
            miso: None,
            sclk: None,
            quadwp: None,
            quadhd: None,
            dma: true,
            max_transfer_sz: DMA_DESCRIPTOR_MAX_BYTES,
            dma_threshold: DEFAULT_DMA_THRESHOLD_BYTES,
            base_clock_hz: APB_CLK_HZ,
            flags: BusFlags::empty(),
        }
    }
}

impl BusConfig {
    pub fn with_pins(mut self, mosi: Option<u8>, miso: Option<u8>, sclk: Option<u8>) -> Self {
        self.mosi = mosi;
        self.miso = miso;
        self.sclk = sclk;
        self
    }

    pub fn with_dma(mut self, dma: bool) -> Self {
        self.dma = dma;
        self
    }

    pub fn with_max_transfer_sz(mut self, bytes: usize) -> Self {
        self.max_transfer_sz = bytes;
        self
    }

    pub fn with_flags(mut self, flags: BusFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Descriptor chunk size actually used, never above what one descriptor can hold.
    pub fn descriptor_bytes(&self) -> usize {
        self.max_transfer_sz.clamp(1, DMA_DESCRIPTOR_MAX_BYTES)
    }

    pub(crate) fn pins(&self) -> impl Iterator<Item = (PinRole, u8)> {
        [
            (PinRole::Mosi, self.mosi),
            (PinRole::Miso, self.miso),
            (PinRole::Sclk, self.sclk),
            (PinRole::QuadWp, self.quadwp),
            (PinRole::QuadHd, self.quadhd),
        ]
        .into_iter()
        .filter_map(|(role, pin)| pin.map(|pin| (role, pin)))
    }

    pub fn validate(&self) -> SpiResult<()> {
        if self.base_clock_hz == 0 {
            return Err(SpiError::InvalidConfig {
                reason: "base clock must be non-zero",
            });
        }
        if self.max_transfer_sz == 0 {
            return Err(SpiError::InvalidConfig {
                reason: "max_transfer_sz must be non-zero",
            });
        }
        let shared = self.flags.contains(BusFlags::SHARED_PINS);
        let mut seen: Vec<(PinRole, u8)> = Vec::with_capacity(5);
        for (role, pin) in self.pins() {
            check_pin(role, pin)?;
            if let Some((first, _)) = seen.iter().find(|(_, used)| *used == pin) {
                if !shared {
                    return Err(SpiError::PinConflict {
                        pin,
                        first: *first,
                        second: role,
                    });
                }
            }
            seen.push((role, pin));
        }
        Ok(())
    }
}

pub(crate) fn check_pin(role: PinRole, pin: u8) -> SpiResult<()> {
    if pin > MAX_GPIO || (role.is_output() && pin >= FIRST_INPUT_ONLY_GPIO) {
        return Err(SpiError::InvalidPin { role, pin });
    }
    Ok(())
}

/// Clock polarity / phase combination.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum SpiMode {
    #[default]
    Mode0,
    Mode1,
    Mode2,
    Mode3,
}

impl SpiMode {
    pub fn cpol(self) -> bool {
        matches!(self, SpiMode::Mode2 | SpiMode::Mode3)
    }

    pub fn cpha(self) -> bool {
        matches!(self, SpiMode::Mode1 | SpiMode::Mode3)
    }
}

impl TryFrom<u8> for SpiMode {
    type Error = SpiError;

    fn try_from(value: u8) -> SpiResult<Self> {
        match value {
            0 => Ok(SpiMode::Mode0),
            1 => Ok(SpiMode::Mode1),
            2 => Ok(SpiMode::Mode2),
            3 => Ok(SpiMode::Mode3),
            _ => Err(SpiError::InvalidConfig {
                reason: "SPI mode must be 0..=3",
            }),
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct DeviceFlags: u32 {
        const TXBIT_LSBFIRST = 0b1;
        const RXBIT_LSBFIRST = 0b10;
        const BIT_LSBFIRST = Self::TXBIT_LSBFIRST.bits() | Self::RXBIT_LSBFIRST.bits();
    }
}

/// Hook run on the dispatcher right before or right after a device's transfer.
pub type TransferHook = Arc<dyn Fn(&Transaction) + Send + Sync>;

#[derive(Clone)]
pub struct DeviceConfig {
    pub clock_speed_hz: u32,
    pub mode: u8,
    pub spics_io_num: Option<u8>,
    pub queue_size: usize,
    pub command_bits: u8,
    pub address_bits: u8,
    pub dummy_bits: u8,
    /// High phase of the clock, in 1/256 of a period.
    pub duty_cycle_pos: u16,
    /// Clock cycles chip select is asserted before the first bit.
    pub cs_ena_pretrans: u8,
    /// Clock cycles chip select stays asserted after the last bit.
    pub cs_ena_posttrans: u8,
    pub flags: DeviceFlags,
    pub pre_transfer: Option<TransferHook>,
    pub post_transfer: Option<TransferHook>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            clock_speed_hz: 1_000_000,
            mode: 0,
            spics_io_num: None,
            queue_size: 1,
            command_bits: 0,
            address_bits: 0,
            dummy_bits: 0,
            duty_cycle_pos: DEFAULT_DUTY_CYCLE,
            cs_ena_pretrans: 0,
            cs_ena_posttrans: 0,
            flags: DeviceFlags::empty(),
            pre_transfer: None,
            post_transfer: None,
        }
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("clock_speed_hz", &self.clock_speed_hz)
            .field("mode", &self.mode)
            .field("spics_io_num", &self.spics_io_num)
            .field("queue_size", &self.queue_size)
            .field("command_bits", &self.command_bits)
            .field("address_bits", &self.address_bits)
            .field("dummy_bits", &self.dummy_bits)
            .field("cs_ena_pretrans", &self.cs_ena_pretrans)
            .field("cs_ena_posttrans", &self.cs_ena_posttrans)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl DeviceConfig {
    pub fn new(clock_speed_hz: u32, spics_io_num: Option<u8>, queue_size: usize) -> Self {
        Self {
            clock_speed_hz,
            spics_io_num,
            queue_size,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: u8) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_fields(mut self, command_bits: u8, address_bits: u8) -> Self {
        self.command_bits = command_bits;
        self.address_bits = address_bits;
        self
    }

    pub fn with_dummy_bits(mut self, dummy_bits: u8) -> Self {
        self.dummy_bits = dummy_bits;
        self
    }

    pub fn with_flags(mut self, flags: DeviceFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_duty_cycle(mut self, duty_cycle_pos: u16) -> Self {
        self.duty_cycle_pos = duty_cycle_pos;
        self
    }

    /// Chip-select setup and hold, in clock cycles.
    pub fn with_cs_timing(mut self, pretrans: u8, posttrans: u8) -> Self {
        self.cs_ena_pretrans = pretrans;
        self.cs_ena_posttrans = posttrans;
        self
    }

    pub fn with_pre_transfer(mut self, hook: impl Fn(&Transaction) + Send + Sync + 'static) -> Self {
        self.pre_transfer = Some(Arc::new(hook));
        self
    }

    pub fn with_post_transfer(
        mut self,
        hook: impl Fn(&Transaction) + Send + Sync + 'static,
    ) -> Self {
        self.post_transfer = Some(Arc::new(hook));
        self
    }

    pub fn tx_order(&self) -> BitOrder {
        if self.flags.contains(DeviceFlags::TXBIT_LSBFIRST) {
            BitOrder::LsbFirst
        } else {
            BitOrder::MsbFirst
        }
    }

    pub fn rx_order(&self) -> BitOrder {
        if self.flags.contains(DeviceFlags::RXBIT_LSBFIRST) {
            BitOrder::LsbFirst
        } else {
            BitOrder::MsbFirst
        }
    }

    pub fn layout(&self) -> FieldLayout {
        FieldLayout {
            command_bits: self.command_bits,
            address_bits: self.address_bits,
            dummy_bits: self.dummy_bits,
        }
    }

    pub fn validate(&self) -> SpiResult<SpiMode> {
        if self.clock_speed_hz == 0 {
            return Err(SpiError::InvalidConfig {
                reason: "clock_speed_hz must be non-zero",
            });
        }
        if self.queue_size == 0 {
            return Err(SpiError::InvalidConfig {
                reason: "queue_size must be at least 1",
            });
        }
        if self.duty_cycle_pos > 256 {
            return Err(SpiError::InvalidConfig {
                reason: "duty_cycle_pos must be at most 256",
            });
        }
        if let Some(pin) = self.spics_io_num {
            check_pin(PinRole::ChipSelect, pin)?;
        }
        self.layout().validate()?;
        SpiMode::try_from(self.mode)
    }
}
