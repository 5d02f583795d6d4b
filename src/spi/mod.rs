//! Shared-bus SPI master engine. A `SpiMaster` owns the host registry; each
//! initialized `Bus` runs one dispatcher that serializes transactions from all
//! attached `Device`s onto the wire.
pub mod bits;
pub mod bus;
pub mod clock;
pub mod dma;
pub mod hw;
pub mod queue;
pub mod transaction;

pub use bits::{BitBuffer, BitOrder};
pub use bus::{
    Bus, BusConfig, BusFlags, Device, DeviceConfig, DeviceFlags, ErrorKind, HostId, SpiError,
    SpiMaster, SpiMode, SpiResult,
};
pub use clock::ClockDivider;
pub use dma::{DmaCapability, HostMemory, MemFlags, MemoryMap, StagingPool};
pub use hw::{
    BusTiming, HwOutcome, HwStatus, LoopbackHardware, SpiHardware, WireFrame, WireProbe, WireRecord,
};
pub use queue::{GLITCH_RETRY_LIMIT, Timeout};
pub use transaction::{TransFlags, Transaction, TransferInfo, TransferStatus};
