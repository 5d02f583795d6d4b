//! Device handles. A `Device` is a cheap clonable handle; the shared record
//! behind it carries the settings derived at attach time and the device's
//! submission and completion queues.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender};

use crate::spi::{
    bits::FieldLayout,
    clock::ClockDivider,
    hw::BusTiming,
    transaction::Transaction,
};

use super::{
    config::{DeviceConfig, HostId, SpiMode},
    error::{SpiError, SpiResult},
    registry::BusShared,
};

#[derive(Debug, Default)]
pub(crate) struct DeviceState {
    pub detached: bool,
    /// Queued or on the wire; completed results are not counted.
    pub pending: usize,
}

pub(crate) struct DeviceShared {
    pub slot: usize,
    pub cs: Option<u8>,
    pub config: DeviceConfig,
    pub divider: ClockDivider,
    pub timing: BusTiming,
    pub layout: FieldLayout,
    /// One token per transaction waiting for dispatch; capacity is the queue depth.
    pub slots_tx: Sender<()>,
    pub slots_rx: Receiver<()>,
    pub done_tx: Sender<Transaction>,
    pub done_rx: Receiver<Transaction>,
    pub state: Mutex<DeviceState>,
}

impl DeviceShared {
    pub fn state(&self) -> SpiResult<MutexGuard<'_, DeviceState>> {
        Ok(self.state.lock()?)
    }

    /// Accounts for a new submission, refusing it once detached.
    pub fn begin(&self) -> SpiResult<()> {
        let mut state = self.state()?;
        if state.detached {
            return Err(SpiError::DeviceDetached);
        }
        state.pending += 1;
        Ok(())
    }

    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.pending = state.pending.saturating_sub(1);
    }
}

#[derive(Clone)]
pub struct Device {
    pub(crate) shared: Arc<DeviceShared>,
    pub(crate) bus: Arc<BusShared>,
}

impl Device {
    pub fn host(&self) -> HostId {
        self.bus.host
    }

    pub fn cs(&self) -> Option<u8> {
        self.shared.cs
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    pub fn divider(&self) -> ClockDivider {
        self.shared.divider
    }

    /// Clock actually produced by the solved divider.
    pub fn frequency(&self) -> u32 {
        self.shared.divider.frequency(self.bus.config.base_clock_hz)
    }

    pub fn mode(&self) -> SpiMode {
        self.shared.timing.mode
    }

    pub fn timing(&self) -> BusTiming {
        self.shared.timing
    }

    pub fn pending(&self) -> SpiResult<usize> {
        Ok(self.shared.state()?.pending)
    }

    pub fn is_detached(&self) -> bool {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .detached
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("host", &self.bus.host)
            .field("slot", &self.shared.slot)
            .field("cs", &self.shared.cs)
            .field("divider", &self.shared.divider)
            .finish()
    }
}
