//! Host registry. `SpiMaster` hands out at most one live `Bus` per host;
//! each bus owns a dispatcher thread and up to three chip-select slots.
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use ahash::AHashMap;
use crossbeam_channel::Sender;

use crate::spi::{
    clock::ClockDivider,
    dma::{DmaCapability, HostMemory, StagingPool},
    hw::{BusTiming, SpiHardware},
    queue::dispatch::{Dispatcher, Job},
};

use super::{
    config::{BusConfig, DeviceConfig, HostId},
    device::{Device, DeviceShared, DeviceState},
    error::{SpiError, SpiResult},
};

/// Hardware chip-select lines per host.
pub const MAX_DEVICES: usize = 3;

pub struct SpiMaster {
    hosts: Mutex<AHashMap<HostId, Arc<BusShared>>>,
    memory: Arc<dyn DmaCapability>,
    pool: StagingPool,
}

impl Default for SpiMaster {
    fn default() -> Self {
        Self::new()
    }
}

impl SpiMaster {
    /// Registry that treats all memory as DMA-capable.
    pub fn new() -> Self {
        Self::with_memory(HostMemory, StagingPool::default())
    }

    pub fn with_memory(memory: impl DmaCapability + 'static, pool: StagingPool) -> Self {
        Self {
            hosts: Mutex::new(AHashMap::new()),
            memory: Arc::new(memory),
            pool,
        }
    }

    pub fn pool(&self) -> &StagingPool {
        &self.pool
    }

    pub fn is_initialized(&self, host: HostId) -> SpiResult<bool> {
        Ok(self.hosts.lock()?.contains_key(&host))
    }

    pub fn initialize(
        &self,
        host: HostId,
        config: BusConfig,
        hardware: impl SpiHardware + 'static,
    ) -> SpiResult<Bus> {
        if host == HostId::Spi {
            return Err(SpiError::ReservedHost { host });
        }
        config.validate()?;

        let mut hosts = self.hosts.lock()?;
        if hosts.contains_key(&host) {
            return Err(SpiError::HostInUse { host });
        }

        let (jobs, job_rx) = crossbeam_channel::unbounded();
        let dispatcher = Dispatcher::new(host, job_rx, Box::new(hardware));
        let worker = thread::Builder::new()
            .name(format!("spi-{host:?}").to_lowercase())
            .spawn(move || dispatcher.run())
            .map_err(|source| SpiError::Spawn { source })?;

        let shared = Arc::new(BusShared {
            host,
            config,
            memory: self.memory.clone(),
            pool: self.pool.clone(),
            devices: Mutex::new(Default::default()),
            jobs,
            worker: Mutex::new(Some(worker)),
            freed: AtomicBool::new(false),
        });
        hosts.insert(host, shared.clone());
        log::debug!(
            "{host:?}: initialized (dma: {}, descriptor {} bytes)",
            shared.config.dma,
            shared.config.descriptor_bytes()
        );
        Ok(Bus { shared })
    }

    /// Stops the bus dispatcher and releases the host for a later `initialize`.
    pub fn free(&self, bus: &Bus) -> SpiResult<()> {
        let host = bus.shared.host;
        let mut hosts = self.hosts.lock()?;
        match hosts.get(&host) {
            Some(live) if Arc::ptr_eq(live, &bus.shared) => {}
            _ => return Err(SpiError::BusFreed { host }),
        }

        {
            let devices = bus.shared.devices.lock()?;
            let count = devices.iter().flatten().count();
            if count > 0 {
                return Err(SpiError::DevicesAttached { host, count });
            }
            bus.shared.freed.store(true, Ordering::Release);
        }

        let _ = bus.shared.jobs.send(Job::Shutdown);
        if let Some(worker) = bus.shared.worker.lock()?.take() {
            if worker.join().is_err() {
                log::warn!("{host:?}: dispatcher exited with a panic");
            }
        }
        hosts.remove(&host);
        log::debug!("{host:?}: freed");
        Ok(())
    }
}

pub(crate) struct BusShared {
    pub host: HostId,
    pub config: BusConfig,
    pub memory: Arc<dyn DmaCapability>,
    pub pool: StagingPool,
    pub devices: Mutex<[Option<Arc<DeviceShared>>; MAX_DEVICES]>,
    pub jobs: Sender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
    freed: AtomicBool,
}

impl BusShared {
    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Acquire)
    }
}

/// Handle onto an initialized host.
#[derive(Clone)]
pub struct Bus {
    shared: Arc<BusShared>,
}

impl Bus {
    pub fn host(&self) -> HostId {
        self.shared.host
    }

    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    pub fn is_freed(&self) -> bool {
        self.shared.is_freed()
    }

    pub fn device_count(&self) -> SpiResult<usize> {
        Ok(self.shared.devices.lock()?.iter().flatten().count())
    }

    /// Registers a device and derives its clock divider. Bus timing is left
    /// alone until the device's first transfer.
    pub fn attach(&self, config: DeviceConfig) -> SpiResult<Device> {
        let bus = &self.shared;
        let host = bus.host;
        let mode = config.validate()?;
        let divider = ClockDivider::solve_with_duty(
            bus.config.base_clock_hz,
            config.clock_speed_hz,
            config.duty_cycle_pos,
        );

        let mut devices = bus.devices.lock()?;
        if bus.is_freed() {
            return Err(SpiError::BusFreed { host });
        }
        if let Some(cs) = config.spics_io_num {
            let on_bus = bus.config.pins().any(|(_, pin)| pin == cs);
            let taken = devices.iter().flatten().any(|device| device.cs == Some(cs));
            if on_bus || taken {
                return Err(SpiError::ChipSelectInUse { pin: cs });
            }
        }
        let slot = devices
            .iter()
            .position(Option::is_none)
            .ok_or(SpiError::NoFreeSlot { host })?;

        let (slots_tx, slots_rx) = crossbeam_channel::bounded(config.queue_size);
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        let timing = BusTiming::for_device(&config, divider, mode);
        let shared = Arc::new(DeviceShared {
            slot,
            cs: config.spics_io_num,
            layout: config.layout(),
            divider,
            timing,
            config,
            slots_tx,
            slots_rx,
            done_tx,
            done_rx,
            state: Mutex::new(DeviceState::default()),
        });
        devices[slot] = Some(shared.clone());
        log::debug!(
            "{host:?}: attached cs {:?} in slot {slot}: {} Hz requested, pre={} n={} ({} Hz)",
            shared.cs,
            shared.config.clock_speed_hz,
            divider.pre(),
            divider.n(),
            divider.frequency(bus.config.base_clock_hz)
        );
        Ok(Device {
            shared,
            bus: bus.clone(),
        })
    }

    /// Removes a device. Fails while it still has transactions queued or on
    /// the wire; completed results nobody collected are dropped.
    pub fn detach(&self, device: &Device) -> SpiResult<()> {
        if !Arc::ptr_eq(&device.bus, &self.shared) {
            return Err(SpiError::InvalidConfig {
                reason: "device belongs to another bus",
            });
        }
        {
            let mut state = device.shared.state()?;
            if state.detached {
                return Err(SpiError::DeviceDetached);
            }
            if state.pending > 0 {
                return Err(SpiError::TransactionsPending {
                    pending: state.pending,
                });
            }
            state.detached = true;
        }

        self.shared.devices.lock()?[device.shared.slot] = None;
        let dropped = device.shared.done_rx.try_iter().count();
        if dropped > 0 {
            log::debug!(
                "{:?}: dropping {dropped} uncollected result(s) of cs {:?}",
                self.shared.host,
                device.shared.cs
            );
        }
        log::debug!(
            "{:?}: detached cs {:?} from slot {}",
            self.shared.host,
            device.shared.cs,
            device.shared.slot
        );
        Ok(())
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("host", &self.shared.host)
            .field("config", &self.shared.config)
            .field("freed", &self.shared.is_freed())
            .finish()
    }
}
