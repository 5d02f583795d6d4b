//! Transaction records. A transaction owns its buffers for its whole trip
//! through the engine and hands them back, filled in, on completion.
use std::borrow::Cow;

use bitflags::bitflags;

use crate::spi::{
    bits::{FieldLayout, Header},
    bus::{ErrorKind, SpiError, SpiResult},
    dma::TransferPath,
};

/// Capacity of the inline `tx_data` / `rx_data` areas.
pub const INLINE_DATA_BYTES: usize = 4;
const INLINE_DATA_BITS: usize = INLINE_DATA_BYTES * 8;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct TransFlags: u32 {
        /// Transmit from `tx_data` instead of `tx_buffer`.
        const USE_TXDATA = 0b1;
        /// Receive into `rx_data` instead of `rx_buffer`.
        const USE_RXDATA = 0b10;
        /// Use this transaction's `command_bits` instead of the device default.
        const VARIABLE_CMD = 0b100;
        /// Use this transaction's `address_bits` instead of the device default.
        const VARIABLE_ADDR = 0b1000;
        /// Use this transaction's `dummy_bits` instead of the device default.
        const VARIABLE_DUMMY = 0b1_0000;
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TransferStatus {
    /// Not completed yet.
    #[default]
    Pending,
    Ok,
    /// The hardware kept failing after the internal glitch retries.
    HardwareFault { attempts: usize },
}

impl TransferStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, TransferStatus::Ok)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            TransferStatus::HardwareFault { .. } => Some(ErrorKind::HardwareFault),
            _ => None,
        }
    }
}

/// How the engine moved a completed transaction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TransferInfo {
    pub path: TransferPath,
    pub tx_staged: bool,
    pub rx_staged: bool,
    pub descriptors: usize,
    pub attempts: usize,
    pub clocked_bits: usize,
}

#[derive(Clone, Debug, Default)]
pub struct Transaction {
    pub flags: TransFlags,
    pub cmd: u16,
    pub addr: u64,
    pub command_bits: u8,
    pub address_bits: u8,
    pub dummy_bits: u8,
    /// Bits clocked in the payload phase.
    pub length: usize,
    /// Bits captured from the payload phase; `None` means `length`.
    pub rx_length: Option<usize>,
    pub tx_buffer: Option<Cow<'static, [u8]>>,
    pub rx_buffer: Option<Vec<u8>>,
    pub tx_data: [u8; INLINE_DATA_BYTES],
    pub rx_data: [u8; INLINE_DATA_BYTES],
    /// Caller tag, untouched by the engine.
    pub user: usize,
    status: TransferStatus,
    info: TransferInfo,
}

impl Transaction {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            ..Self::default()
        }
    }

    pub fn with_tx(mut self, buffer: impl Into<Cow<'static, [u8]>>) -> Self {
        self.tx_buffer = Some(buffer.into());
        self
    }

    pub fn with_rx(mut self, buffer: Vec<u8>) -> Self {
        self.rx_buffer = Some(buffer);
        self
    }

    pub fn with_rx_length(mut self, bits: usize) -> Self {
        self.rx_length = Some(bits);
        self
    }

    pub fn with_tx_data(mut self, data: [u8; INLINE_DATA_BYTES]) -> Self {
        self.tx_data = data;
        self.flags |= TransFlags::USE_TXDATA;
        self
    }

    pub fn with_rx_data(mut self) -> Self {
        self.flags |= TransFlags::USE_RXDATA;
        self
    }

    /// Command value sent with the device's default command width.
    pub fn with_cmd(mut self, cmd: u16) -> Self {
        self.cmd = cmd;
        self
    }

    /// Address value sent with the device's default address width.
    pub fn with_addr(mut self, addr: u64) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_command(mut self, cmd: u16, bits: u8) -> Self {
        self.cmd = cmd;
        self.command_bits = bits;
        self.flags |= TransFlags::VARIABLE_CMD;
        self
    }

    pub fn with_address(mut self, addr: u64, bits: u8) -> Self {
        self.addr = addr;
        self.address_bits = bits;
        self.flags |= TransFlags::VARIABLE_ADDR;
        self
    }

    pub fn with_dummy(mut self, bits: u8) -> Self {
        self.dummy_bits = bits;
        self.flags |= TransFlags::VARIABLE_DUMMY;
        self
    }

    pub fn with_user(mut self, user: usize) -> Self {
        self.user = user;
        self
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn info(&self) -> TransferInfo {
        self.info
    }

    pub fn header(&self) -> Header {
        Header {
            command: self.cmd,
            address: self.addr,
        }
    }

    /// Bytes the payload phase shifts out, if any.
    pub fn tx_bytes(&self) -> Option<&[u8]> {
        if self.flags.contains(TransFlags::USE_TXDATA) {
            Some(&self.tx_data)
        } else {
            self.tx_buffer.as_deref()
        }
    }

    /// Received bytes, from whichever capture area the transaction selected.
    pub fn received(&self) -> Option<&[u8]> {
        if self.flags.contains(TransFlags::USE_RXDATA) {
            Some(&self.rx_data)
        } else {
            self.rx_buffer.as_deref()
        }
    }

    pub(crate) fn has_rx_target(&self) -> bool {
        self.flags.contains(TransFlags::USE_RXDATA) || self.rx_buffer.is_some()
    }

    /// Bits sampled from MISO. With no capture area and no explicit
    /// `rx_length` nothing is sampled at all.
    pub fn capture_bits(&self) -> usize {
        match self.rx_length {
            Some(bits) => bits,
            None if self.has_rx_target() => self.length,
            None => 0,
        }
    }

    /// Header layout after applying the per-transaction overrides to `defaults`.
    pub fn layout(&self, defaults: FieldLayout) -> FieldLayout {
        let mut layout = defaults;
        if self.flags.contains(TransFlags::VARIABLE_CMD) {
            layout.command_bits = self.command_bits;
        }
        if self.flags.contains(TransFlags::VARIABLE_ADDR) {
            layout.address_bits = self.address_bits;
        }
        if self.flags.contains(TransFlags::VARIABLE_DUMMY) {
            layout.dummy_bits = self.dummy_bits;
        }
        layout
    }

    /// Checks the record against its own invariants and returns the effective layout.
    pub fn validate(&self, defaults: FieldLayout) -> SpiResult<FieldLayout> {
        let capture = self.capture_bits();
        if capture > self.length {
            return Err(SpiError::InvalidTransaction {
                reason: "rx_length exceeds length",
            });
        }
        if self.flags.contains(TransFlags::USE_TXDATA) {
            if self.tx_buffer.is_some() {
                return Err(SpiError::InvalidTransaction {
                    reason: "USE_TXDATA set together with tx_buffer",
                });
            }
            if self.length > INLINE_DATA_BITS {
                return Err(SpiError::InvalidTransaction {
                    reason: "inline tx data holds at most 32 bits",
                });
            }
        } else if let Some(tx) = &self.tx_buffer {
            if tx.len() * 8 < self.length {
                return Err(SpiError::InvalidTransaction {
                    reason: "tx_buffer shorter than length",
                });
            }
        }
        if self.flags.contains(TransFlags::USE_RXDATA) {
            if self.rx_buffer.is_some() {
                return Err(SpiError::InvalidTransaction {
                    reason: "USE_RXDATA set together with rx_buffer",
                });
            }
            if capture > INLINE_DATA_BITS {
                return Err(SpiError::InvalidTransaction {
                    reason: "inline rx data holds at most 32 bits",
                });
            }
        } else if let Some(rx) = &self.rx_buffer {
            if rx.len() * 8 < capture {
                return Err(SpiError::InvalidTransaction {
                    reason: "rx_buffer shorter than rx_length",
                });
            }
        }
        let layout = self.layout(defaults);
        layout.validate()?;
        Ok(layout)
    }

    pub(crate) fn complete(&mut self, status: TransferStatus, info: TransferInfo) {
        self.status = status;
        self.info = info;
    }
}
