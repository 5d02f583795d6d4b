use hex_literal::hex;
use spimux::spi::{
    BitOrder, DeviceConfig, DeviceFlags, ErrorKind, HostId, SpiError, SpiMaster, Transaction,
    bits::FieldLayout,
};

use crate::common;

const COMMAND: u16 = 0xA5C3;
const ADDRESS: u64 = 0x0123_4567_89AB_CDEF;

fn mask(bits: u8) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

#[test]
fn variable_fields_reach_the_slave_intact() {
    for (flags, order) in [
        (DeviceFlags::empty(), BitOrder::MsbFirst),
        (DeviceFlags::BIT_LSBFIRST, BitOrder::LsbFirst),
    ] {
        let master = SpiMaster::new();
        let (bus, probe) = common::loopback_bus(&master, HostId::Hspi, common::rig_config());
        let device = bus
            .attach(DeviceConfig::new(1_000_000, Some(common::CS_A), 1).with_flags(flags))
            .expect("attach");

        for command_bits in [0u8, 1, 7, 8, 12, 16] {
            for address_bits in [0u8, 1, 5, 24, 32, 40, 63, 64] {
                let payload = common::pattern(3, command_bits ^ address_bits);
                probe.clear();
                let done = device
                    .transmit(
                        Transaction::new(20)
                            .with_tx(payload.clone())
                            .with_rx(vec![0; 3])
                            .with_command(COMMAND, command_bits)
                            .with_address(ADDRESS, address_bits),
                    )
                    .expect("transmit");

                let record = &probe.records()[0];
                assert_eq!(
                    record.bits.len(),
                    command_bits as usize + address_bits as usize + 20,
                    "fields are bit-contiguous"
                );
                let layout = FieldLayout::new(command_bits, address_bits).expect("layout");
                let (header, offset) = layout.decode(&record.bits, order).expect("decode");
                assert_eq!(header.command as u64, COMMAND as u64 & mask(command_bits));
                assert_eq!(header.address, ADDRESS & mask(address_bits));
                assert_eq!(offset, record.header_bits);

                let rx = done.received().expect("rx");
                assert_eq!(&rx[..2], &payload[..2], "{order:?} {command_bits}/{address_bits}");
                let tail = match order {
                    BitOrder::MsbFirst => 0xF0,
                    BitOrder::LsbFirst => 0x0F,
                };
                assert_eq!(rx[2] & tail, payload[2] & tail);
            }
        }
        bus.detach(&device).expect("detach");
        master.free(&bus).expect("free");
    }
}

#[test]
fn default_widths_produce_the_expected_wire_image() {
    let master = SpiMaster::new();
    let (bus, probe) = common::loopback_bus(&master, HostId::Hspi, common::rig_config());
    let device = bus
        .attach(DeviceConfig::new(1_000_000, Some(common::CS_A), 1).with_fields(8, 24))
        .expect("attach");

    device
        .transmit(
            Transaction::new(8)
                .with_tx(vec![0xAB])
                .with_cmd(0x9F)
                .with_addr(0x12_3456),
        )
        .expect("transmit");
    let record = &probe.records()[0];
    assert_eq!(record.header_bits, 32);
    assert_eq!(record.bits.to_bytes(BitOrder::MsbFirst), hex!("9F 12 34 56 AB"));

    bus.detach(&device).expect("detach");
    master.free(&bus).expect("free");
}

#[test]
fn lsb_first_sends_field_bit_zero_first() {
    let master = SpiMaster::new();
    let (bus, probe) = common::loopback_bus(&master, HostId::Hspi, common::rig_config());
    let msb = bus
        .attach(DeviceConfig::new(1_000_000, Some(common::CS_A), 1))
        .expect("attach msb");
    let lsb = bus
        .attach(
            DeviceConfig::new(1_000_000, Some(common::CS_B), 1)
                .with_flags(DeviceFlags::TXBIT_LSBFIRST),
        )
        .expect("attach lsb");

    for device in [&msb, &lsb] {
        device
            .transmit(Transaction::new(0).with_command(0x1, 4))
            .expect("transmit");
    }
    let records = probe.records();
    assert!(records[0].bits.bit(3) && !records[0].bits.bit(0), "MSB-first: 0001");
    assert!(records[1].bits.bit(0) && !records[1].bits.bit(3), "LSB-first: 1000");

    bus.detach(&msb).expect("detach");
    bus.detach(&lsb).expect("detach");
    master.free(&bus).expect("free");
}

#[test]
fn dummy_cycles_sit_between_header_and_payload() {
    let master = SpiMaster::new();
    let (bus, probe) = common::loopback_bus(&master, HostId::Hspi, common::rig_config());
    let device = bus
        .attach(
            DeviceConfig::new(1_000_000, Some(common::CS_A), 1)
                .with_fields(8, 24)
                .with_dummy_bits(8),
        )
        .expect("attach");

    let done = device
        .transmit(
            Transaction::new(32)
                .with_cmd(0x0B)
                .with_addr(0x00_1000)
                .with_tx(vec![1, 2, 3, 4])
                .with_rx(vec![0; 4]),
        )
        .expect("transmit");
    assert_eq!(done.received(), Some(&[1u8, 2, 3, 4][..]));
    let record = &probe.records()[0];
    assert_eq!(record.header_bits, 40);
    assert_eq!(record.bits.read_bits(32, 8), 0, "dummy cycles idle low");

    let quick = device
        .transmit(Transaction::new(8).with_dummy(0).with_tx(vec![0xFF]))
        .expect("transmit");
    assert!(quick.status().is_ok());
    assert_eq!(probe.records()[1].header_bits, 32, "dummy overridden per transaction");

    bus.detach(&device).expect("detach");
    master.free(&bus).expect("free");
}

#[test]
fn oversized_fields_are_configuration_errors() {
    let master = SpiMaster::new();
    let (bus, probe) = common::loopback_bus(&master, HostId::Hspi, common::rig_config());

    let err = bus
        .attach(DeviceConfig::new(1_000_000, Some(common::CS_A), 1).with_fields(17, 0))
        .unwrap_err();
    assert!(matches!(
        err,
        SpiError::FieldTooWide {
            field: "command",
            ..
        }
    ));

    let device = bus
        .attach(DeviceConfig::new(1_000_000, Some(common::CS_A), 1))
        .expect("attach");
    let err = device
        .transmit(Transaction::new(8).with_address(0, 65).with_tx(vec![0]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(probe.frame_count(), 0);

    bus.detach(&device).expect("detach");
    master.free(&bus).expect("free");
}
