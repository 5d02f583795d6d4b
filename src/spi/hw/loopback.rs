//! Software peripheral with MOSI jumpered to MISO. Every frame that reaches
//! the wire is recorded so tests can look at the bus from the slave side.
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use crate::spi::{bits::BitBuffer, dma::TransferPath};

use super::{BusTiming, HwOutcome, HwStatus, SpiHardware, WireFrame};

#[derive(Clone, Debug)]
pub struct WireRecord {
    pub cs: Option<u8>,
    pub timing: BusTiming,
    pub bits: BitBuffer,
    pub header_bits: usize,
    pub capture_bits: usize,
    pub path: TransferPath,
    pub descriptors: usize,
}

impl WireRecord {
    /// Payload phase as seen by the slave.
    pub fn payload(&self) -> BitBuffer {
        self.bits
            .view(self.header_bits, self.bits.len() - self.header_bits)
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    records: Vec<WireRecord>,
    configures: Vec<BusTiming>,
    glitches: usize,
    faults: usize,
    delay: Option<Duration>,
    busy: bool,
    overlaps: usize,
}

/// Shared handle onto a `LoopbackHardware`, kept by the test after the
/// hardware itself moves into the bus.
#[derive(Clone, Debug, Default)]
pub struct WireProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl WireProbe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn records(&self) -> Vec<WireRecord> {
        self.lock().records.clone()
    }

    pub fn frame_count(&self) -> usize {
        self.lock().records.len()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.records.clear();
        state.configures.clear();
    }

    /// Timing loads seen so far, in order.
    pub fn configures(&self) -> Vec<BusTiming> {
        self.lock().configures.clone()
    }

    /// The next `count` frames clock nothing and report zero bits.
    pub fn inject_glitches(&self, count: usize) {
        self.lock().glitches += count;
    }

    /// The next `count` frames report a hardware fault.
    pub fn inject_faults(&self, count: usize) {
        self.lock().faults += count;
    }

    /// Holds each frame on the wire for `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.lock().delay = delay;
    }

    /// Frames that started while another was still on the wire.
    pub fn overlaps(&self) -> usize {
        self.lock().overlaps
    }
}

#[derive(Debug, Default)]
pub struct LoopbackHardware {
    probe: WireProbe,
}

impl LoopbackHardware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self) -> WireProbe {
        self.probe.clone()
    }
}

impl SpiHardware for LoopbackHardware {
    fn configure(&mut self, timing: &BusTiming) {
        log::trace!("loopback: load {timing:?}");
        self.probe.lock().configures.push(*timing);
    }

    fn execute(&mut self, timing: &BusTiming, frame: &WireFrame) -> HwOutcome {
        let delay = {
            let mut state = self.probe.lock();
            if state.busy {
                state.overlaps += 1;
            }
            state.busy = true;
            state.delay
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut state = self.probe.lock();
        state.busy = false;
        if state.glitches > 0 {
            state.glitches -= 1;
            return HwOutcome::glitch();
        }
        if state.faults > 0 {
            state.faults -= 1;
            return HwOutcome::fault();
        }
        state.records.push(WireRecord {
            cs: frame.cs,
            timing: *timing,
            bits: frame.bits.clone(),
            header_bits: frame.header_bits,
            capture_bits: frame.capture_bits,
            path: frame.path,
            descriptors: frame.descriptors,
        });
        HwOutcome {
            status: HwStatus::Ok,
            clocked_bits: frame.bits.len(),
            miso: frame.bits.clone(),
        }
    }
}
