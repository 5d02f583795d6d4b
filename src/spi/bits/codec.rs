//! Command/address framing. The header fields are bit-contiguous with each
//! other and with the payload: command, then address, then dummy cycles.
//! Zero-width fields emit nothing.

use crate::spi::bus::{SpiError, SpiResult};

use super::{BitBuffer, BitOrder, mask_bits};

pub const MAX_COMMAND_BITS: u8 = 16;
pub const MAX_ADDRESS_BITS: u8 = 64;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct FieldLayout {
    pub command_bits: u8,
    pub address_bits: u8,
    pub dummy_bits: u8,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Header {
    pub command: u16,
    pub address: u64,
}

impl FieldLayout {
    pub fn new(command_bits: u8, address_bits: u8) -> SpiResult<Self> {
        let layout = Self {
            command_bits,
            address_bits,
            dummy_bits: 0,
        };
        layout.validate()?;
        Ok(layout)
    }

    pub fn with_dummy(mut self, dummy_bits: u8) -> Self {
        self.dummy_bits = dummy_bits;
        self
    }

    pub fn validate(&self) -> SpiResult<()> {
        if self.command_bits > MAX_COMMAND_BITS {
            return Err(SpiError::FieldTooWide {
                field: "command",
                bits: self.command_bits as usize,
                max: MAX_COMMAND_BITS as usize,
            });
        }
        if self.address_bits > MAX_ADDRESS_BITS {
            return Err(SpiError::FieldTooWide {
                field: "address",
                bits: self.address_bits as usize,
                max: MAX_ADDRESS_BITS as usize,
            });
        }
        Ok(())
    }

    #[inline(always)]
    pub fn header_bits(&self) -> usize {
        self.command_bits as usize + self.address_bits as usize + self.dummy_bits as usize
    }

    /// Appends the header to `out`. Each field sends its low `*_bits` bits.
    pub fn encode(&self, header: Header, order: BitOrder, out: &mut BitBuffer) {
        out.push_field(header.command as u64, self.command_bits as usize, order);
        out.push_field(header.address, self.address_bits as usize, order);
        for _ in 0..self.dummy_bits {
            out.push_bit(false);
        }
    }

    /// Extracts the header from the front of a captured stream and returns it
    /// with the bit offset at which the payload starts.
    pub fn decode(&self, stream: &BitBuffer, order: BitOrder) -> SpiResult<(Header, usize)> {
        let needed = self.header_bits();
        if stream.len() < needed {
            return Err(SpiError::FrameTooShort {
                needed,
                available: stream.len(),
            });
        }
        let command_bits = self.command_bits as usize;
        let address_bits = self.address_bits as usize;
        let command = stream.read_field(0, command_bits, order) & mask_bits(command_bits);
        let address =
            stream.read_field(command_bits, address_bits, order) & mask_bits(address_bits);
        Ok((
            Header {
                command: command as u16,
                address,
            },
            needed,
        ))
    }

    /// Header followed by `payload_bits` bits of `payload`, as it appears on the wire.
    pub fn frame(
        &self,
        header: Header,
        payload: &[u8],
        payload_bits: usize,
        order: BitOrder,
    ) -> BitBuffer {
        let mut out = BitBuffer::with_capacity(self.header_bits() + payload_bits);
        self.encode(header, order, &mut out);
        out.push_bytes(payload, payload_bits, order);
        out
    }
}
