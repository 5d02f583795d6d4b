//! DMA memory handling: capability lookups, the staging pool and the
//! per-transaction staging planner.
pub mod capability;
pub mod pool;
pub mod stager;

pub use capability::{DmaCapability, HostMemory, MemFlags, MemoryMap};
pub use pool::{DEFAULT_POOL_BYTES, StagingBuffer, StagingPool};
pub use stager::{
    DescriptorChain, FIFO_BYTES, RxStage, Segment, StagePlan, Stager, TransferPath, TxStage,
};

/// DMA buffers must start on, and receive buffers span, whole 32-bit words.
pub const DMA_ALIGN: usize = 4;
