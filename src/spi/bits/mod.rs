//! Bit-addressable buffer used to assemble and inspect wire bitstreams.
//!
//! Bits are kept in transmission order: stream bit `i` lives in byte
//! `(start + i) / 8`, counted from that byte's most significant bit. A buffer
//! is a view (`start` offset + `len` bits) over its backing bytes, so slicing a
//! frame never has to realign the whole stream.
pub mod codec;

pub use codec::{FieldLayout, Header, MAX_ADDRESS_BITS, MAX_COMMAND_BITS};

/// Order in which the bits of a byte (or field) leave the shift register.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum BitOrder {
    #[default]
    MsbFirst,
    LsbFirst,
}

impl BitOrder {
    #[inline(always)]
    fn shape(self, byte: u8) -> u8 {
        match self {
            BitOrder::MsbFirst => byte,
            BitOrder::LsbFirst => byte.reverse_bits(),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BitBuffer {
    bytes: Vec<u8>,
    start: usize,
    len: usize,
}

impl BitBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bits: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bits.div_ceil(8)),
            start: 0,
            len: 0,
        }
    }

    /// `bits` zero bits.
    pub fn zeroed(bits: usize) -> Self {
        Self {
            bytes: vec![0; bits.div_ceil(8)],
            start: 0,
            len: bits,
        }
    }

    /// Wraps raw stream bytes, first bit in the MSB of `bytes[0]`.
    pub fn from_raw(bytes: &[u8], bits: usize) -> Self {
        assert!(bits <= bytes.len() * 8, "bit length exceeds backing bytes");
        Self {
            bytes: bytes[..bits.div_ceil(8)].to_vec(),
            start: 0,
            len: bits,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub fn start(&self) -> usize {
        self.start
    }

    #[inline(always)]
    fn locate(&self, index: usize) -> (usize, u8) {
        let abs = self.start + index;
        (abs / 8, 0x80 >> (abs % 8))
    }

    pub fn bit(&self, index: usize) -> bool {
        assert!(index < self.len, "bit {index} outside stream of {}", self.len);
        let (byte, mask) = self.locate(index);
        self.bytes[byte] & mask != 0
    }

    pub fn push_bit(&mut self, bit: bool) {
        let (byte, mask) = self.locate(self.len);
        if byte >= self.bytes.len() {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[byte] |= mask;
        } else {
            self.bytes[byte] &= !mask;
        }
        self.len += 1;
    }

    /// Appends the low `width` bits of `value`, most significant first.
    pub fn push_bits(&mut self, value: u64, width: usize) {
        assert!(width <= 64, "field width {width} exceeds 64 bits");
        for shift in (0..width).rev() {
            self.push_bit((value >> shift) & 1 != 0);
        }
    }

    /// Appends the low `width` bits of `value` in the requested order. LSB-first
    /// reverses the field within its own width, not per byte.
    pub fn push_field(&mut self, value: u64, width: usize, order: BitOrder) {
        let masked = value & mask_bits(width);
        match order {
            BitOrder::MsbFirst => self.push_bits(masked, width),
            BitOrder::LsbFirst => self.push_bits(reverse_field(masked, width), width),
        }
    }

    /// Appends the first `bits` bits of `bytes`, shifting each byte out in `order`.
    /// A trailing partial byte contributes its first-transmitted bits.
    pub fn push_bytes(&mut self, bytes: &[u8], bits: usize, order: BitOrder) {
        assert!(bits <= bytes.len() * 8, "bit length exceeds source bytes");
        let whole = bits / 8;
        let rem = bits % 8;

        if (self.start + self.len) % 8 == 0 {
            let used = (self.start + self.len) / 8;
            self.bytes.truncate(used);
            self.bytes
                .extend(bytes[..whole].iter().map(|byte| order.shape(*byte)));
            if rem > 0 {
                self.bytes.push(order.shape(bytes[whole]) & !(0xFF >> rem));
            }
            self.len += bits;
            return;
        }

        for byte in &bytes[..whole] {
            self.push_bits(order.shape(*byte) as u64, 8);
        }
        if rem > 0 {
            let shaped = order.shape(bytes[whole]);
            self.push_bits((shaped >> (8 - rem)) as u64, rem);
        }
    }

    pub fn append(&mut self, other: &BitBuffer) {
        for index in 0..other.len {
            self.push_bit(other.bit(index));
        }
    }

    /// Reads `width` bits at `offset` as an unsigned value, first bit most significant.
    pub fn read_bits(&self, offset: usize, width: usize) -> u64 {
        assert!(width <= 64, "field width {width} exceeds 64 bits");
        assert!(
            offset + width <= self.len,
            "read of {width} bits at {offset} overruns stream of {}",
            self.len
        );
        let mut value = 0u64;
        let mut index = 0;
        while index < width {
            let abs = self.start + offset + index;
            if abs % 8 == 0 && width - index >= 8 {
                value = (value << 8) | self.bytes[abs / 8] as u64;
                index += 8;
            } else {
                value = (value << 1) | self.bit(offset + index) as u64;
                index += 1;
            }
        }
        value
    }

    /// Inverse of `push_field`.
    pub fn read_field(&self, offset: usize, width: usize, order: BitOrder) -> u64 {
        let raw = self.read_bits(offset, width);
        match order {
            BitOrder::MsbFirst => raw,
            BitOrder::LsbFirst => reverse_field(raw, width),
        }
    }

    /// Sub-stream of `len` bits at `offset`, keeping the original bit phase.
    pub fn view(&self, offset: usize, len: usize) -> BitBuffer {
        assert!(offset + len <= self.len, "view overruns stream");
        let abs = self.start + offset;
        let first = abs / 8;
        let last = (abs + len).div_ceil(8);
        BitBuffer {
            bytes: self.bytes[first..last.max(first)].to_vec(),
            start: abs % 8,
            len,
        }
    }

    /// Writes `bits` stream bits starting at `offset` into `out`, filling each
    /// byte in `order`. Bits of `out` past the written range are preserved,
    /// including the unused part of a trailing partial byte.
    pub fn unpack_into(&self, offset: usize, bits: usize, order: BitOrder, out: &mut [u8]) {
        assert!(bits <= out.len() * 8, "destination too small for {bits} bits");
        let mut done = 0;
        let mut slot = 0;
        while done < bits {
            let take = (bits - done).min(8);
            let raw = (self.read_bits(offset + done, take) as u8) << (8 - take);
            let mask = order.shape(0xFF << (8 - take));
            out[slot] = (out[slot] & !mask) | order.shape(raw);
            done += take;
            slot += 1;
        }
    }

    /// Collects the stream into bytes shaped for `order`, zero-padding the tail.
    pub fn to_bytes(&self, order: BitOrder) -> Vec<u8> {
        let mut out = vec![0u8; self.len.div_ceil(8)];
        self.unpack_into(0, self.len, order, &mut out);
        out
    }
}

#[inline(always)]
pub(crate) fn mask_bits(width: usize) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

#[inline(always)]
pub(crate) fn reverse_field(value: u64, width: usize) -> u64 {
    if width == 0 {
        0
    } else {
        value.reverse_bits() >> (64 - width)
    }
}
