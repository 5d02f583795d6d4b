//! Transaction submission and completion. Submissions are validated and
//! staged in the caller's thread, take a slot in the device's bounded
//! submission queue and are then handed to the bus dispatcher.
pub(crate) mod dispatch;

use std::time::Duration;

use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, TrySendError,
};

use crate::spi::{
    bus::{Device, SpiError, SpiResult},
    dma::Stager,
    transaction::Transaction,
};

use dispatch::{Job, Queued, Reply};

pub use dispatch::GLITCH_RETRY_LIMIT;

/// How long a blocking call may wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Timeout {
    /// Fail straight away if the call would block.
    Immediate,
    After(Duration),
    Forever,
}

impl From<Duration> for Timeout {
    fn from(value: Duration) -> Self {
        Timeout::After(value)
    }
}

impl Timeout {
    pub(crate) fn push<T>(self, tx: &Sender<T>, item: T) -> SpiResult<()> {
        match self {
            Timeout::Immediate => tx.try_send(item).map_err(|err| match err {
                TrySendError::Full(_) => SpiError::Timeout,
                TrySendError::Disconnected(_) => SpiError::DeviceDetached,
            }),
            Timeout::After(wait) => tx.send_timeout(item, wait).map_err(|err| match err {
                SendTimeoutError::Timeout(_) => SpiError::Timeout,
                SendTimeoutError::Disconnected(_) => SpiError::DeviceDetached,
            }),
            Timeout::Forever => tx.send(item).map_err(|_| SpiError::DeviceDetached),
        }
    }

    pub(crate) fn pop<T>(self, rx: &Receiver<T>) -> SpiResult<T> {
        match self {
            Timeout::Immediate => rx.try_recv().map_err(|err| match err {
                TryRecvError::Empty => SpiError::Timeout,
                TryRecvError::Disconnected => SpiError::DeviceDetached,
            }),
            Timeout::After(wait) => rx.recv_timeout(wait).map_err(|err| match err {
                RecvTimeoutError::Timeout => SpiError::Timeout,
                RecvTimeoutError::Disconnected => SpiError::DeviceDetached,
            }),
            Timeout::Forever => rx.recv().map_err(|_| SpiError::DeviceDetached),
        }
    }
}

impl Device {
    /// Submits `trans` and blocks until it has been on the wire. The returned
    /// transaction carries the completion status and any received data.
    pub fn transmit(&self, trans: Transaction) -> SpiResult<Transaction> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.submit(trans, Reply::Direct(tx), Timeout::Forever)?;
        rx.recv().map_err(|_| SpiError::BusFreed { host: self.host() })
    }

    /// Enqueues `trans`, waiting up to `timeout` for room in the submission
    /// queue. Fetch the result with [`Device::collect`].
    ///
    /// `queue_size` bounds only the transactions waiting for the wire.
    /// Completed results stay in the completion queue, buffers included,
    /// until collected or until the device is detached; see
    /// [`Device::completed`].
    pub fn queue(&self, trans: Transaction, timeout: impl Into<Timeout>) -> SpiResult<()> {
        self.submit(trans, Reply::Collect, timeout.into())
    }

    /// Oldest completed, uncollected transaction of this device.
    pub fn collect(&self, timeout: impl Into<Timeout>) -> SpiResult<Transaction> {
        if self.shared.state()?.detached {
            return Err(SpiError::DeviceDetached);
        }
        timeout.into().pop(&self.shared.done_rx)
    }

    /// Completed results waiting for [`Device::collect`].
    pub fn completed(&self) -> usize {
        self.shared.done_rx.len()
    }

    fn submit(&self, trans: Transaction, reply: Reply, timeout: Timeout) -> SpiResult<()> {
        let device = &self.shared;
        let bus = &self.bus;
        if bus.is_freed() {
            return Err(SpiError::BusFreed { host: bus.host });
        }

        let layout = trans.validate(device.layout)?;
        let plan = Stager::new(&bus.config, bus.memory.as_ref(), &bus.pool).stage(&trans)?;

        device.begin()?;
        if let Err(err) = timeout.push(&device.slots_tx, ()) {
            device.finish();
            return Err(err);
        }

        let job = Job::Transfer(Box::new(Queued {
            device: device.clone(),
            trans,
            plan,
            layout,
            reply,
        }));
        if bus.jobs.send(job).is_err() {
            let _ = device.slots_rx.try_recv();
            device.finish();
            return Err(SpiError::BusFreed { host: bus.host });
        }
        Ok(())
    }
}
