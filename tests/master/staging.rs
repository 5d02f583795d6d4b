use hex_literal::hex;
use spimux::spi::{
    BitOrder, BusConfig, DeviceConfig, DeviceFlags, ErrorKind, HostId, MemFlags, MemoryMap,
    SpiError, SpiMaster, StagingPool, Timeout, Transaction, dma::TransferPath,
};

use crate::common;

static FLASH_TABLE: [u8; 32] = hex!(
    "00 11 22 33 44 55 66 77 88 99 AA BB CC DD EE FF"
    "0F 1E 2D 3C 4B 5A 69 78 87 96 A5 B4 C3 D2 E1 F0"
);

#[repr(align(4))]
struct WordAligned([u8; 40]);

static WORD_TABLE: WordAligned = WordAligned(hex!(
    "A1 B2 C3 D4 E5 F6 07 18 29 3A 4B 5C 6D 7E 8F 90"
    "13 57 9B DF 24 68 AC E0 FE DC BA 98 76 54 32 10"
    "5A A5 3C C3 96 69 0F F0"
));

fn flash_map() -> MemoryMap {
    let mut map = MemoryMap::new(MemFlags::DMA);
    map.map_slice("drom", &FLASH_TABLE, MemFlags::empty())
        .expect("map flash table");
    map
}

#[test]
fn transmit_only_transfer_captures_nothing() {
    let master = SpiMaster::new();
    let (bus, probe) = common::loopback_bus(&master, HostId::Hspi, common::rig_config());
    let device = bus
        .attach(DeviceConfig::new(1_000_000, Some(common::CS_A), 1))
        .expect("attach");

    let done = device
        .transmit(Transaction::new(128).with_tx(common::pattern(16, 3)))
        .expect("transmit");
    assert!(done.status().is_ok());
    assert_eq!(done.received(), None);
    let info = done.info();
    assert_eq!(info.clocked_bits, 128);
    assert!(!info.rx_staged, "no receive staging for transmit-only");
    assert_eq!(master.pool().available(), master.pool().capacity());
    assert_eq!(probe.records()[0].capture_bits, 0);

    bus.detach(&device).expect("detach");
    master.free(&bus).expect("free");
}

#[test]
fn short_receive_leaves_tail_untouched() {
    let master = SpiMaster::new();
    let (bus, _probe) = common::loopback_bus(&master, HostId::Hspi, common::rig_config());
    let device = bus
        .attach(DeviceConfig::new(1_000_000, Some(common::CS_A), 1))
        .expect("attach");
    let tx = hex!("DE AD BE EF 01 23 45 67");

    let done = device
        .transmit(
            Transaction::new(64)
                .with_tx(tx.to_vec())
                .with_rx(vec![0xEE; 8])
                .with_rx_length(56),
        )
        .expect("transmit");
    let rx = done.received().expect("rx buffer");
    assert_eq!(&rx[..7], &tx[..7]);
    assert_eq!(rx[7], 0xEE, "bits past rx_length are not written");
    assert_eq!(done.info().clocked_bits, 64, "the wire still runs the full length");

    let done = device
        .transmit(
            Transaction::new(64)
                .with_tx(tx.to_vec())
                .with_rx(vec![0xEE; 8])
                .with_rx_length(60),
        )
        .expect("transmit");
    let rx = done.received().expect("rx buffer");
    assert_eq!(rx[7] & 0xF0, tx[7] & 0xF0);
    assert_eq!(rx[7] & 0x0F, 0x0E, "partial byte keeps its uncaptured bits");

    bus.detach(&device).expect("detach");
    master.free(&bus).expect("free");
}

#[test]
fn oversized_transfers_split_without_interleaving() {
    const LEN: usize = 4096 * 3;
    let master = SpiMaster::new();
    let (bus, probe) = common::loopback_bus(&master, HostId::Vspi, common::rig_config());
    let a = bus
        .attach(DeviceConfig::new(20_000_000, Some(common::CS_A), 2))
        .expect("attach a");
    let b = bus
        .attach(DeviceConfig::new(8_000_000, Some(common::CS_B), 2))
        .expect("attach b");

    for seed in 0..2u8 {
        let big = |seed| {
            Transaction::new(LEN * 8)
                .with_tx(common::pattern(LEN, seed))
                .with_rx(vec![0; LEN])
        };
        a.queue(big(seed), Timeout::Forever).expect("queue a");
        b.queue(big(seed + 0x40), Timeout::Forever).expect("queue b");
    }
    for seed in 0..2u8 {
        let from_a = a.collect(Timeout::Forever).expect("collect a");
        let from_b = b.collect(Timeout::Forever).expect("collect b");
        assert_eq!(from_a.info().path, TransferPath::Dma);
        assert_eq!(from_a.info().descriptors, 4, "3 x 4092 + 12 bytes");
        assert!(from_a.received() == Some(&common::pattern(LEN, seed)[..]));
        assert!(from_b.received() == Some(&common::pattern(LEN, seed + 0x40)[..]));
    }

    for record in probe.records() {
        assert_eq!(record.bits.len(), LEN * 8);
        assert_eq!(record.descriptors, 4);
        let base = match record.cs {
            Some(common::CS_A) => 0,
            Some(common::CS_B) => 0x40,
            other => panic!("frame on unexpected chip select {other:?}"),
        };
        let payload = record.payload().to_bytes(record.timing.tx_order);
        assert!(
            payload == common::pattern(LEN, base) || payload == common::pattern(LEN, base + 1),
            "each frame carries exactly one transaction"
        );
    }

    bus.detach(&a).expect("detach a");
    bus.detach(&b).expect("detach b");
    master.free(&bus).expect("free");
}

#[test]
fn descriptor_size_follows_bus_limit() {
    let master = SpiMaster::new();
    let config = common::rig_config().with_max_transfer_sz(1024);
    let (bus, _probe) = common::loopback_bus(&master, HostId::Hspi, config);
    let device = bus
        .attach(DeviceConfig::new(1_000_000, Some(common::CS_A), 1))
        .expect("attach");

    let done = device
        .transmit(
            Transaction::new(5000 * 8)
                .with_tx(common::pattern(5000, 1))
                .with_rx(vec![0; 5000]),
        )
        .expect("transmit");
    assert_eq!(done.info().descriptors, 5);
    assert!(done.received() == Some(&common::pattern(5000, 1)[..]));

    bus.detach(&device).expect("detach");
    master.free(&bus).expect("free");
}

#[test]
fn dma_disabled_bus_goes_through_the_fifo() {
    let master = SpiMaster::new();
    let (bus, _probe) =
        common::loopback_bus(&master, HostId::Hspi, common::rig_config().with_dma(false));
    let device = bus
        .attach(DeviceConfig::new(1_000_000, Some(common::CS_A), 1))
        .expect("attach");

    let done = device
        .transmit(
            Transaction::new(200 * 8)
                .with_tx(common::pattern(200, 5))
                .with_rx(vec![0; 200]),
        )
        .expect("transmit");
    let info = done.info();
    assert_eq!(info.path, TransferPath::Direct);
    assert_eq!(info.descriptors, 4, "64 byte FIFO refills");
    assert!(!info.tx_staged && !info.rx_staged);
    assert_eq!(done.received(), Some(&common::pattern(200, 5)[..]));

    bus.detach(&device).expect("detach");
    master.free(&bus).expect("free");
}

#[test]
fn flash_resident_tx_is_staged_transparently() {
    let master = SpiMaster::with_memory(flash_map(), StagingPool::default());
    let (bus, _probe) = common::loopback_bus(&master, HostId::Hspi, common::rig_config());
    let device = bus
        .attach(DeviceConfig::new(1_000_000, Some(common::CS_A), 1))
        .expect("attach");

    let done = device
        .transmit(
            Transaction::new(32 * 8)
                .with_tx(&FLASH_TABLE[..])
                .with_rx(vec![0; 32]),
        )
        .expect("transmit");
    assert!(done.info().tx_staged);
    assert_eq!(done.received(), Some(&FLASH_TABLE[..]));
    assert_eq!(
        master.pool().available(),
        master.pool().capacity(),
        "staging buffers are returned"
    );

    bus.detach(&device).expect("detach");
    master.free(&bus).expect("free");
}

#[test]
fn staging_exhaustion_fails_before_the_wire() {
    let master = SpiMaster::with_memory(flash_map(), StagingPool::new(16));
    let (bus, probe) = common::loopback_bus(&master, HostId::Hspi, common::rig_config());
    let device = bus
        .attach(DeviceConfig::new(1_000_000, Some(common::CS_A), 1))
        .expect("attach");

    let err = device
        .queue(
            Transaction::new(32 * 8).with_tx(&FLASH_TABLE[..]),
            Timeout::Immediate,
        )
        .unwrap_err();
    assert!(matches!(err, SpiError::StagingExhausted { .. }));
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_eq!(probe.frame_count(), 0);
    assert_eq!(device.pending().expect("pending"), 0);

    bus.detach(&device).expect("nothing left pending");
    master.free(&bus).expect("free");
}

#[test]
fn inline_data_round_trips() {
    let master = SpiMaster::new();
    let (bus, _probe) = common::loopback_bus(&master, HostId::Hspi, common::rig_config());
    let device = bus
        .attach(DeviceConfig::new(1_000_000, Some(common::CS_A), 1))
        .expect("attach");

    let done = device
        .transmit(
            Transaction::new(32)
                .with_tx_data(hex!("C0 FF EE 42"))
                .with_rx_data(),
        )
        .expect("transmit");
    assert_eq!(done.rx_data, hex!("C0 FF EE 42"));
    assert_eq!(done.received(), Some(&hex!("C0 FF EE 42")[..]));

    let err = device
        .transmit(Transaction::new(40).with_tx_data([0; 4]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    bus.detach(&device).expect("detach");
    master.free(&bus).expect("free");
}

#[test]
fn bus_threshold_keeps_tiny_payloads_off_dma() {
    let master = SpiMaster::new();
    let config = BusConfig {
        dma_threshold: 64,
        ..common::rig_config()
    };
    let (bus, _probe) = common::loopback_bus(&master, HostId::Hspi, config);
    let device = bus
        .attach(DeviceConfig::new(1_000_000, Some(common::CS_A), 1))
        .expect("attach");

    let small = device
        .transmit(Transaction::new(16 * 8).with_tx(common::pattern(16, 0)))
        .expect("small");
    assert_eq!(small.info().path, TransferPath::Direct);
    let large = device
        .transmit(Transaction::new(64 * 8).with_tx(common::pattern(64, 0)))
        .expect("large");
    assert_eq!(large.info().path, TransferPath::Dma);

    bus.detach(&device).expect("detach");
    master.free(&bus).expect("free");
}

#[test]
fn misaligned_tx_is_realigned_without_changing_bits() {
    const BITS: usize = 32 * 8 + 5;
    // One byte past a word boundary, so DMA cannot read it in place.
    let source: &'static [u8] = &WORD_TABLE.0[1..34];
    assert_ne!(source.as_ptr() as usize % 4, 0);

    for (flags, order, captured) in [
        (DeviceFlags::empty(), BitOrder::MsbFirst, 0xF8u8),
        (DeviceFlags::BIT_LSBFIRST, BitOrder::LsbFirst, 0x1F),
    ] {
        let master = SpiMaster::new();
        let (bus, probe) = common::loopback_bus(&master, HostId::Hspi, common::rig_config());
        let device = bus
            .attach(DeviceConfig::new(1_000_000, Some(common::CS_A), 1).with_flags(flags))
            .expect("attach");

        let done = device
            .transmit(
                Transaction::new(BITS)
                    .with_tx(source)
                    .with_rx(vec![0xEE; 33]),
            )
            .expect("transmit");
        assert!(done.status().is_ok());
        let info = done.info();
        assert_eq!(info.path, TransferPath::Dma);
        assert!(info.tx_staged, "{order:?}: unaligned start is staged");
        assert_eq!(info.clocked_bits, BITS);

        let records = probe.records();
        let record = &records[0];
        assert_eq!(record.bits.len(), BITS);
        let wire = record.payload().to_bytes(order);
        assert_eq!(&wire[..32], &source[..32], "{order:?}: staging keeps byte order");
        assert_eq!(wire[32] & captured, source[32] & captured);

        let rx = done.received().expect("rx buffer");
        assert_eq!(&rx[..32], &source[..32]);
        assert_eq!(rx[32] & captured, source[32] & captured, "{order:?}");
        assert_eq!(rx[32] & !captured, 0xEE & !captured, "{order:?}: tail bits preserved");
        assert_eq!(master.pool().available(), master.pool().capacity());

        bus.detach(&device).expect("detach");
        master.free(&bus).expect("free");
    }
}
