//! Decides, per transaction, whether the payload goes through DMA or the
//! hardware FIFO, which caller buffers need a staging copy, and how the
//! payload is cut into descriptors. Runs in the submitting thread so that
//! staging failures surface before anything is queued.
use smallvec::SmallVec;

use crate::spi::{
    bits::{BitBuffer, BitOrder},
    bus::{BusConfig, SpiResult},
    transaction::{TransFlags, Transaction},
};

use super::{
    DMA_ALIGN,
    capability::DmaCapability,
    pool::{StagingBuffer, StagingPool},
};

/// Depth of the hardware data FIFO used by direct transfers.
pub const FIFO_BYTES: usize = 64;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum TransferPath {
    /// Processor fills and drains the FIFO.
    #[default]
    Direct,
    Dma,
}

/// One hardware descriptor: a byte span of the payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Segment {
    pub offset: usize,
    pub len: usize,
}

pub type DescriptorChain = SmallVec<[Segment; 4]>;

#[derive(Debug)]
pub enum TxStage {
    /// Nothing to send; MOSI shifts zeros.
    Idle,
    Inline,
    InPlace,
    Staged(StagingBuffer),
}

#[derive(Debug)]
pub enum RxStage {
    /// Nothing is sampled.
    Idle,
    /// Sampled bits are dropped.
    Discard,
    Inline,
    InPlace,
    Staged {
        buffer: StagingBuffer,
        copy_back: bool,
    },
}

#[derive(Debug)]
pub struct StagePlan {
    pub path: TransferPath,
    pub tx: TxStage,
    pub rx: RxStage,
    pub chain: DescriptorChain,
    pub capture_bits: usize,
}

impl StagePlan {
    pub fn tx_staged(&self) -> bool {
        matches!(self.tx, TxStage::Staged(_))
    }

    pub fn rx_staged(&self) -> bool {
        matches!(self.rx, RxStage::Staged { .. })
    }

    /// Payload bytes as they will be shifted out.
    pub fn tx_source<'a>(&'a self, trans: &'a Transaction) -> Option<&'a [u8]> {
        match &self.tx {
            TxStage::Idle => None,
            TxStage::Inline => Some(&trans.tx_data),
            TxStage::InPlace => trans.tx_buffer.as_deref(),
            TxStage::Staged(buffer) => Some(buffer.as_slice()),
        }
    }

    /// Moves the sampled payload-phase bits into the transaction's capture area.
    pub fn land(&mut self, trans: &mut Transaction, miso: &BitBuffer, order: BitOrder) {
        let bits = self.capture_bits.min(miso.len());
        if bits == 0 {
            return;
        }
        match &mut self.rx {
            RxStage::Idle | RxStage::Discard => {}
            RxStage::Inline => miso.unpack_into(0, bits, order, &mut trans.rx_data),
            RxStage::InPlace => {
                if let Some(rx) = trans.rx_buffer.as_mut() {
                    miso.unpack_into(0, bits, order, rx);
                }
            }
            RxStage::Staged { buffer, copy_back } => {
                miso.unpack_into(0, bits, order, buffer.as_mut_slice());
                if *copy_back {
                    if let Some(rx) = trans.rx_buffer.as_mut() {
                        copy_bits(buffer.as_slice(), rx, bits, order);
                    }
                }
            }
        }
    }
}

/// Copies the first `bits` stream bits from `src` to `dst`, leaving the
/// remaining bits of `dst` untouched.
fn copy_bits(src: &[u8], dst: &mut [u8], bits: usize, order: BitOrder) {
    let whole = bits / 8;
    dst[..whole].copy_from_slice(&src[..whole]);
    let rem = bits % 8;
    if rem > 0 {
        let top = 0xFFu8 << (8 - rem);
        let mask = match order {
            BitOrder::MsbFirst => top,
            BitOrder::LsbFirst => top.reverse_bits(),
        };
        dst[whole] = (dst[whole] & !mask) | (src[whole] & mask);
    }
}

pub struct Stager<'a> {
    config: &'a BusConfig,
    memory: &'a dyn DmaCapability,
    pool: &'a StagingPool,
}

impl<'a> Stager<'a> {
    pub fn new(config: &'a BusConfig, memory: &'a dyn DmaCapability, pool: &'a StagingPool) -> Self {
        Self {
            config,
            memory,
            pool,
        }
    }

    pub fn stage(&self, trans: &Transaction) -> SpiResult<StagePlan> {
        let payload_bytes = trans.length.div_ceil(8);
        let capture_bits = trans.capture_bits();
        let use_dma = self.config.dma && payload_bytes >= self.config.dma_threshold;

        let (path, tx, rx, chunk) = if use_dma {
            (
                TransferPath::Dma,
                self.stage_tx(trans, payload_bytes)?,
                self.stage_rx(trans, capture_bits)?,
                self.config.descriptor_bytes(),
            )
        } else {
            (
                TransferPath::Direct,
                direct_tx(trans),
                direct_rx(trans, capture_bits),
                FIFO_BYTES,
            )
        };

        Ok(StagePlan {
            path,
            tx,
            rx,
            chain: split(payload_bytes, chunk),
            capture_bits,
        })
    }

    fn stage_tx(&self, trans: &Transaction, bytes: usize) -> SpiResult<TxStage> {
        if trans.flags.contains(TransFlags::USE_TXDATA) {
            return Ok(TxStage::Inline);
        }
        let Some(source) = trans.tx_buffer.as_deref() else {
            return Ok(TxStage::Idle);
        };
        let start = source.as_ptr() as usize;
        let readable = self.memory.is_dma_accessible(start..start + bytes);
        if readable && start % DMA_ALIGN == 0 {
            return Ok(TxStage::InPlace);
        }
        log::trace!(
            "staging {bytes} tx bytes at 0x{start:08X} (dma readable: {readable})"
        );
        let mut buffer = self.pool.allocate(bytes)?;
        buffer.as_mut_slice().copy_from_slice(&source[..bytes]);
        Ok(TxStage::Staged(buffer))
    }

    fn stage_rx(&self, trans: &Transaction, capture_bits: usize) -> SpiResult<RxStage> {
        if capture_bits == 0 {
            return Ok(RxStage::Idle);
        }
        if trans.flags.contains(TransFlags::USE_RXDATA) {
            return Ok(RxStage::Inline);
        }
        let bytes = capture_bits.div_ceil(8);
        let Some(target) = trans.rx_buffer.as_deref() else {
            return Ok(RxStage::Staged {
                buffer: self.pool.allocate(bytes)?,
                copy_back: false,
            });
        };
        let start = target.as_ptr() as usize;
        let writable = self.memory.is_dma_writable(start..start + bytes);
        if writable && start % DMA_ALIGN == 0 && bytes % DMA_ALIGN == 0 {
            return Ok(RxStage::InPlace);
        }
        log::trace!(
            "staging {bytes} rx bytes for 0x{start:08X} (dma writable: {writable})"
        );
        Ok(RxStage::Staged {
            buffer: self.pool.allocate(bytes)?,
            copy_back: true,
        })
    }
}

fn direct_tx(trans: &Transaction) -> TxStage {
    if trans.flags.contains(TransFlags::USE_TXDATA) {
        TxStage::Inline
    } else if trans.tx_buffer.is_some() {
        TxStage::InPlace
    } else {
        TxStage::Idle
    }
}

fn direct_rx(trans: &Transaction, capture_bits: usize) -> RxStage {
    if capture_bits == 0 {
        RxStage::Idle
    } else if trans.flags.contains(TransFlags::USE_RXDATA) {
        RxStage::Inline
    } else if trans.rx_buffer.is_some() {
        RxStage::InPlace
    } else {
        RxStage::Discard
    }
}

fn split(bytes: usize, chunk: usize) -> DescriptorChain {
    let mut chain = DescriptorChain::new();
    let mut offset = 0;
    while offset < bytes {
        let len = chunk.min(bytes - offset);
        chain.push(Segment { offset, len });
        offset += len;
    }
    chain
}
