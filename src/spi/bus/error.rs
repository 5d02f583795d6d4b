use std::{error::Error, fmt, sync::PoisonError};

use super::config::{HostId, PinRole};

pub type SpiResult<T> = Result<T, SpiError>;

/// Coarse classification callers branch on; every `SpiError` maps to exactly one.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Invalid or conflicting configuration. Never retried internally.
    Config,
    /// Staging memory or hardware slots exhausted.
    Resource,
    /// Dependent resources still in use; quiesce first.
    Busy,
    /// The caller's wait budget ran out.
    Timeout,
    /// Persistent transfer failure, reported through `TransferStatus`.
    HardwareFault,
}

#[derive(Debug)]
pub enum SpiError {
    HostInUse {
        host: HostId,
    },
    ReservedHost {
        host: HostId,
    },
    InvalidPin {
        role: PinRole,
        pin: u8,
    },
    PinConflict {
        pin: u8,
        first: PinRole,
        second: PinRole,
    },
    ChipSelectInUse {
        pin: u8,
    },
    InvalidConfig {
        reason: &'static str,
    },
    FieldTooWide {
        field: &'static str,
        bits: usize,
        max: usize,
    },
    InvalidTransaction {
        reason: &'static str,
    },
    FrameTooShort {
        needed: usize,
        available: usize,
    },
    DeviceDetached,
    BusFreed {
        host: HostId,
    },
    NoFreeSlot {
        host: HostId,
    },
    StagingExhausted {
        requested: usize,
        available: usize,
    },
    DevicesAttached {
        host: HostId,
        count: usize,
    },
    TransactionsPending {
        pending: usize,
    },
    Timeout,
    LockPoisoned,
    Spawn {
        source: std::io::Error,
    },
}

impl SpiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpiError::HostInUse { .. }
            | SpiError::ReservedHost { .. }
            | SpiError::InvalidPin { .. }
            | SpiError::PinConflict { .. }
            | SpiError::ChipSelectInUse { .. }
            | SpiError::InvalidConfig { .. }
            | SpiError::FieldTooWide { .. }
            | SpiError::InvalidTransaction { .. }
            | SpiError::FrameTooShort { .. }
            | SpiError::DeviceDetached
            | SpiError::BusFreed { .. } => ErrorKind::Config,
            SpiError::NoFreeSlot { .. }
            | SpiError::StagingExhausted { .. }
            | SpiError::LockPoisoned
            | SpiError::Spawn { .. } => ErrorKind::Resource,
            SpiError::DevicesAttached { .. } | SpiError::TransactionsPending { .. } => {
                ErrorKind::Busy
            }
            SpiError::Timeout => ErrorKind::Timeout,
        }
    }
}

impl fmt::Display for SpiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpiError::HostInUse { host } => write!(f, "{host:?} is already initialized"),
            SpiError::ReservedHost { host } => {
                write!(f, "{host:?} is reserved for the flash interface")
            }
            SpiError::InvalidPin { role, pin } => {
                write!(f, "GPIO{pin} cannot serve as {role:?}")
            }
            SpiError::PinConflict { pin, first, second } => write!(
                f,
                "GPIO{pin} assigned to both {first:?} and {second:?} without SHARED_PINS"
            ),
            SpiError::ChipSelectInUse { pin } => {
                write!(f, "chip select GPIO{pin} already used on this bus")
            }
            SpiError::InvalidConfig { reason } => write!(f, "invalid configuration: {reason}"),
            SpiError::FieldTooWide { field, bits, max } => {
                write!(f, "{field} field of {bits} bits exceeds {max} bits")
            }
            SpiError::InvalidTransaction { reason } => write!(f, "invalid transaction: {reason}"),
            SpiError::FrameTooShort { needed, available } => write!(
                f,
                "frame holds {available} bits but the header needs {needed}"
            ),
            SpiError::DeviceDetached => write!(f, "device has been detached"),
            SpiError::BusFreed { host } => write!(f, "{host:?} has been freed"),
            SpiError::NoFreeSlot { host } => {
                write!(f, "no free chip-select slot left on {host:?}")
            }
            SpiError::StagingExhausted {
                requested,
                available,
            } => write!(
                f,
                "staging pool cannot provide {requested} bytes ({available} available)"
            ),
            SpiError::DevicesAttached { host, count } => {
                write!(f, "{host:?} still has {count} attached device(s)")
            }
            SpiError::TransactionsPending { pending } => {
                write!(f, "device has {pending} transaction(s) queued or in flight")
            }
            SpiError::Timeout => write!(f, "wait timed out"),
            SpiError::LockPoisoned => {
                write!(f, "bus lock has been poisoned due to a prior panic")
            }
            SpiError::Spawn { source } => write!(f, "failed to start bus dispatcher: {source}"),
        }
    }
}

impl Error for SpiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SpiError::Spawn { source } => Some(source),
            _ => None,
        }
    }
}

impl<T> From<PoisonError<T>> for SpiError {
    fn from(_value: PoisonError<T>) -> Self {
        SpiError::LockPoisoned
    }
}
