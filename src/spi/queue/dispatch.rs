//! The per-bus dispatch loop. One thread owns the hardware and the
//! programmed timing; every device of the bus feeds it through a single FIFO
//! channel, so jobs hit the wire in the order they were enqueued.
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use crossbeam_channel::{Receiver, Sender};

use crate::spi::{
    bits::{BitBuffer, FieldLayout},
    bus::{DeviceShared, HostId, TransferHook},
    dma::StagePlan,
    hw::{BusTiming, HwOutcome, HwStatus, SpiHardware, WireFrame},
    transaction::{Transaction, TransferInfo, TransferStatus},
};

/// Zero-clocked frames are re-run at most this many times.
pub const GLITCH_RETRY_LIMIT: usize = 3;

pub(crate) enum Job {
    Transfer(Box<Queued>),
    Shutdown,
}

pub(crate) enum Reply {
    /// Result goes to the device's completion queue for `collect`.
    Collect,
    /// Result goes straight back to a blocked `transmit`.
    Direct(Sender<Transaction>),
}

pub(crate) struct Queued {
    pub device: Arc<DeviceShared>,
    pub trans: Transaction,
    pub plan: StagePlan,
    pub layout: FieldLayout,
    pub reply: Reply,
}

pub(crate) struct Dispatcher {
    host: HostId,
    jobs: Receiver<Job>,
    hardware: Box<dyn SpiHardware>,
    programmed: Option<BusTiming>,
}

impl Dispatcher {
    pub fn new(host: HostId, jobs: Receiver<Job>, hardware: Box<dyn SpiHardware>) -> Self {
        Self {
            host,
            jobs,
            hardware,
            programmed: None,
        }
    }

    pub fn run(mut self) {
        while let Ok(job) = self.jobs.recv() {
            match job {
                Job::Transfer(queued) => self.dispatch(*queued),
                Job::Shutdown => break,
            }
        }
        log::debug!("{:?}: dispatcher stopped", self.host);
    }

    fn dispatch(&mut self, queued: Queued) {
        let Queued {
            device,
            mut trans,
            mut plan,
            layout,
            reply,
        } = queued;
        // The job has left the submission queue.
        let _ = device.slots_rx.try_recv();

        self.program(&device.timing);
        if let Some(hook) = &device.config.pre_transfer {
            self.run_hook("pre", hook, &device, &trans);
        }

        let frame = build_frame(&device, &trans, &plan, layout);
        log::trace!(
            "{:?}: cs {:?} {} header + {} payload bits via {:?} ({} descriptor(s))",
            self.host,
            frame.cs,
            frame.header_bits,
            frame.payload_bits(),
            frame.path,
            plan.chain.len()
        );

        let (status, attempts, outcome) = self.execute(&device.timing, &frame);
        if let Some(outcome) = &outcome {
            let available = outcome.miso.len().saturating_sub(frame.header_bits);
            if available > 0 {
                let payload = outcome.miso.view(frame.header_bits, available);
                plan.land(&mut trans, &payload, device.timing.rx_order);
            }
        }

        let info = TransferInfo {
            path: plan.path,
            tx_staged: plan.tx_staged(),
            rx_staged: plan.rx_staged(),
            descriptors: plan.chain.len(),
            attempts,
            clocked_bits: outcome.map(|outcome| outcome.clocked_bits).unwrap_or(0),
        };
        trans.complete(status, info);
        // Staging buffers go back to the pool before the caller sees the result.
        drop(plan);

        if let Some(hook) = &device.config.post_transfer {
            self.run_hook("post", hook, &device, &trans);
        }
        device.finish();

        match reply {
            Reply::Collect => {
                let _ = device.done_tx.send(trans);
            }
            Reply::Direct(tx) => {
                let _ = tx.send(trans);
            }
        }
    }

    /// A panicking hook must not take the dispatcher down with it: the
    /// transfer goes ahead and the panic is only logged.
    fn run_hook(
        &self,
        stage: &str,
        hook: &TransferHook,
        device: &DeviceShared,
        trans: &Transaction,
    ) {
        if panic::catch_unwind(AssertUnwindSafe(|| hook(trans))).is_err() {
            log::warn!(
                "{:?}: {stage}-transfer hook of cs {:?} panicked (user {})",
                self.host,
                device.cs,
                trans.user
            );
        }
    }

    fn program(&mut self, timing: &BusTiming) {
        if self.programmed.as_ref() == Some(timing) {
            return;
        }
        log::trace!(
            "{:?}: reprogram pre={} n={} {:?}",
            self.host,
            timing.divider.pre(),
            timing.divider.n(),
            timing.mode
        );
        self.hardware.configure(timing);
        self.programmed = Some(*timing);
    }

    /// Runs the frame, silently re-running it while the peripheral reports
    /// zero clocked bits.
    fn execute(
        &mut self,
        timing: &BusTiming,
        frame: &WireFrame,
    ) -> (TransferStatus, usize, Option<HwOutcome>) {
        if frame.bits.is_empty() {
            return (TransferStatus::Ok, 0, None);
        }
        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = self.hardware.execute(timing, frame);
            match outcome.status {
                HwStatus::Fault => {
                    log::warn!("{:?}: hardware fault on cs {:?}", self.host, frame.cs);
                    return (TransferStatus::HardwareFault { attempts }, attempts, None);
                }
                HwStatus::Ok if outcome.clocked_bits == 0 => {
                    if attempts > GLITCH_RETRY_LIMIT {
                        log::warn!(
                            "{:?}: cs {:?} clocked nothing after {attempts} attempts",
                            self.host,
                            frame.cs
                        );
                        return (TransferStatus::HardwareFault { attempts }, attempts, None);
                    }
                    log::warn!(
                        "{:?}: zero-length transfer on cs {:?}, retrying",
                        self.host,
                        frame.cs
                    );
                }
                HwStatus::Ok => return (TransferStatus::Ok, attempts, Some(outcome)),
            }
        }
    }
}

/// Header, then the payload walked descriptor by descriptor. Without a TX
/// source MOSI idles low for the payload phase.
fn build_frame(
    device: &DeviceShared,
    trans: &Transaction,
    plan: &StagePlan,
    layout: FieldLayout,
) -> WireFrame {
    let order = device.timing.tx_order;
    let mut bits = BitBuffer::with_capacity(layout.header_bits() + trans.length);
    layout.encode(trans.header(), order, &mut bits);

    match plan.tx_source(trans) {
        Some(source) => {
            for segment in &plan.chain {
                let seg_bits = (segment.len * 8).min(trans.length - segment.offset * 8);
                let end = segment.offset + segment.len;
                bits.push_bytes(&source[segment.offset..end], seg_bits, order);
            }
        }
        None => bits.append(&BitBuffer::zeroed(trans.length)),
    }

    WireFrame {
        cs: device.cs,
        header_bits: layout.header_bits(),
        capture_bits: plan.capture_bits,
        path: plan.path,
        descriptors: plan.chain.len(),
        bits,
    }
}
