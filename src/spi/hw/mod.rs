//! Boundary between the dispatcher and the peripheral. The dispatcher hands
//! over a fully framed bitstream; the hardware clocks it out and returns
//! whatever it sampled on MISO.
pub mod loopback;

pub use loopback::{LoopbackHardware, WireProbe, WireRecord};

use crate::spi::{
    bits::{BitBuffer, BitOrder},
    bus::{DeviceConfig, SpiMode},
    clock::ClockDivider,
    dma::TransferPath,
};

/// Bus-level register state. Written by the dispatcher only when the next
/// device needs something different from what is programmed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct BusTiming {
    pub divider: ClockDivider,
    pub mode: SpiMode,
    pub tx_order: BitOrder,
    pub rx_order: BitOrder,
    pub cs_pretrans: u8,
    pub cs_posttrans: u8,
}

impl BusTiming {
    pub fn for_device(config: &DeviceConfig, divider: ClockDivider, mode: SpiMode) -> Self {
        Self {
            divider,
            mode,
            tx_order: config.tx_order(),
            rx_order: config.rx_order(),
            cs_pretrans: config.cs_ena_pretrans,
            cs_posttrans: config.cs_ena_posttrans,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WireFrame {
    /// Chip-select GPIO asserted for the frame, if the device has one.
    pub cs: Option<u8>,
    /// Header followed by payload, already shaped for the TX bit order.
    pub bits: BitBuffer,
    pub header_bits: usize,
    /// Payload bits the caller wants sampled.
    pub capture_bits: usize,
    pub path: TransferPath,
    pub descriptors: usize,
}

impl WireFrame {
    pub fn payload_bits(&self) -> usize {
        self.bits.len() - self.header_bits
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HwStatus {
    Ok,
    Fault,
}

#[derive(Clone, Debug)]
pub struct HwOutcome {
    pub status: HwStatus,
    /// Bits the peripheral reports as clocked; zero flags a glitched transfer.
    pub clocked_bits: usize,
    /// MISO samples for the whole frame, header included.
    pub miso: BitBuffer,
}

impl HwOutcome {
    pub fn fault() -> Self {
        Self {
            status: HwStatus::Fault,
            clocked_bits: 0,
            miso: BitBuffer::new(),
        }
    }

    pub fn glitch() -> Self {
        Self {
            status: HwStatus::Ok,
            clocked_bits: 0,
            miso: BitBuffer::new(),
        }
    }
}

pub trait SpiHardware: Send {
    /// Loads divider, mode and bit-order registers.
    fn configure(&mut self, timing: &BusTiming);

    /// Runs one complete frame with chip select held for its whole length.
    fn execute(&mut self, timing: &BusTiming, frame: &WireFrame) -> HwOutcome;
}
