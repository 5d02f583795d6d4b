//! Bus and device registry: host ownership, pin and chip-select checks, and
//! the handles callers submit transactions through.
pub mod config;
pub mod device;
pub mod error;
pub mod registry;

pub use config::{
    BusConfig, BusFlags, DEFAULT_DMA_THRESHOLD_BYTES, DMA_DESCRIPTOR_MAX_BYTES, DeviceConfig,
    DeviceFlags, HostId, PinRole, SpiMode, TransferHook,
};
pub use device::Device;
pub use error::{ErrorKind, SpiError, SpiResult};
pub use registry::{Bus, MAX_DEVICES, SpiMaster};

pub(crate) use device::DeviceShared;
