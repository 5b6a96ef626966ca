// Licensed under the Apache-2.0 license

//! End-to-end protocol tests: master engine, ADC driver and simulated
//! target running against each other on the shared open-drain bus, with
//! the passive monitor asserting the exact wire traffic.

use bitmaster_ddk::adc::config::{AdcConfigBuilder, REG_LO_THRESH};
use bitmaster_ddk::adc::{AdcDriver, DriverState};
use bitmaster_ddk::bus::Bus;
use bitmaster_ddk::i2c::{BlockingI2c, EngineConfigBuilder, MasterEngine};
use bitmaster_ddk::sim::{BusEvent, Rig, SimTarget};
use bitmaster_ddk::trigger::{AlertEdgeTrigger, IntervalTrigger};
use embedded_hal::i2c::I2c;
use fugit::HertzU32;
use hex_literal::hex;

fn engine() -> MasterEngine {
    MasterEngine::new(
        EngineConfigBuilder::new()
            .tick_rate(HertzU32::kHz(400))
            .build(),
    )
}

/// Every Byte event must sit between a Start and a Stop; repeated START
/// while a transaction is open is legal, a bare Stop or stray byte is not.
fn assert_well_formed(events: &[BusEvent]) {
    let mut open = false;
    for event in events {
        match event {
            BusEvent::Start => open = true,
            BusEvent::Stop => {
                assert!(open, "STOP without a preceding START");
                open = false;
            }
            BusEvent::Byte { .. } => assert!(open, "byte outside START/STOP"),
        }
    }
    assert!(!open, "trace ends inside a transaction");
}

#[test]
fn polling_init_is_a_single_framed_config_write() {
    let target = SimTarget::new(0x48).conversion_period(1_000_000);
    let driver = AdcDriver::new(AdcConfigBuilder::new().build(), IntervalTrigger::new(1_000_000));
    let mut rig = Rig::new(engine(), target, driver);

    for _ in 0..5_000 {
        rig.tick();
        if rig.driver.state() == DriverState::AwaitingSample {
            break;
        }
    }
    assert_eq!(rig.driver.state(), DriverState::AwaitingSample);

    // One transaction: START, addressed write, config word with the
    // comparator disabled, STOP after the last acknowledged byte.
    let events: Vec<BusEvent> = rig.monitor.events.iter().copied().collect();
    assert_well_formed(&events);
    assert_eq!(
        events,
        [
            BusEvent::Start,
            BusEvent::Byte {
                value: 0x90,
                acked: true
            },
            BusEvent::Byte {
                value: 0x01,
                acked: true
            },
            BusEvent::Byte {
                value: 0xC2,
                acked: true
            },
            BusEvent::Byte {
                value: 0xE3,
                acked: true
            },
            BusEvent::Stop,
        ]
    );
}

#[test]
fn alert_init_writes_config_and_inverted_thresholds_bit_exactly() {
    let target = SimTarget::new(0x48).conversion_period(1_000_000);
    let driver = AdcDriver::new(AdcConfigBuilder::new().build(), AlertEdgeTrigger::new());
    let mut rig = Rig::new(engine(), target, driver);

    for _ in 0..10_000 {
        rig.tick();
        if rig.driver.state() == DriverState::AwaitingSample {
            break;
        }
    }
    assert_eq!(rig.driver.state(), DriverState::AwaitingSample);

    // Three independent START..STOP transactions: config with comparator
    // armed, then the swapped threshold registers.
    assert_eq!(
        rig.monitor.bytes().as_slice(),
        &hex!("90 01 C2 E0 90 02 7F FF 90 03 80 00")[..]
    );
    let events: Vec<BusEvent> = rig.monitor.events.iter().copied().collect();
    assert_well_formed(&events);
    assert_eq!(events.len(), 18);
    for transaction in events.chunks(6) {
        assert_eq!(transaction.first(), Some(&BusEvent::Start));
        assert_eq!(transaction.last(), Some(&BusEvent::Stop));
        for event in &transaction[1..5] {
            assert!(matches!(event, BusEvent::Byte { acked: true, .. }));
        }
    }
    // Device side agrees.
    assert_eq!(rig.target.register(0x01), 0xC2E0);
    assert_eq!(rig.target.register(0x02), 0x7FFF);
    assert_eq!(rig.target.register(0x03), 0x8000);
}

#[test]
fn one_sample_per_alert_edge_over_a_thousand_conversions() {
    // Conversion period comfortably longer than one full read transaction
    // so every edge's read completes before the next conversion.
    let target = SimTarget::new(0x48)
        .conversion_period(400)
        .ramp(100, 3)
        .alert_pulse(1);
    let driver = AdcDriver::new(AdcConfigBuilder::new().build(), AlertEdgeTrigger::new());
    let mut rig = Rig::new(engine(), target, driver);

    // Settle: init plus the first latched read.
    let first = rig.run_for_sample(100_000).expect("no first sample");
    let baseline = rig.target.conversions_done();
    let mut previous = first.value;
    let mut samples = 0u32;

    while rig.target.conversions_done() < baseline + 1_000 {
        rig.tick();
        if let Some(sample) = rig.driver.take_sample() {
            // Each sample is the fresh conversion, never a re-read.
            assert_eq!(sample.value, previous.wrapping_add(3));
            previous = sample.value;
            samples += 1;
        }
    }
    // Drain the read in flight for the final conversion.
    for _ in 0..300 {
        rig.tick();
        if let Some(sample) = rig.driver.take_sample() {
            assert_eq!(sample.value, previous.wrapping_add(3));
            previous = sample.value;
            samples += 1;
        }
    }

    assert_eq!(samples, 1_000);
    assert_ne!(rig.driver.state(), DriverState::Faulted);
}

#[test]
fn aggressive_polling_never_corrupts_in_flight_transactions() {
    // Poll period far shorter than one read transaction: triggers land
    // while the engine is busy and must be deferred, not double-submitted.
    let target = SimTarget::new(0x48).conversion_period(64).ramp(0, 1);
    let driver = AdcDriver::new(AdcConfigBuilder::new().build(), IntervalTrigger::new(10));
    let mut rig = Rig::new(engine(), target, driver);

    let mut sequences = Vec::new();
    let mut completions = 0u32;
    for _ in 0..200_000 {
        rig.tick();
        if rig.engine.status().transaction_done {
            completions += 1;
        }
        if let Some(sample) = rig.driver.take_sample() {
            sequences.push(sample.sequence);
            if sequences.len() == 20 {
                break;
            }
        }
    }

    assert_eq!(sequences, (1..=20).collect::<Vec<u32>>());
    // One init write plus exactly two segments (pointer write, read) per
    // sample: a double submit would skew this count.
    assert_eq!(completions, 1 + 2 * 20);
    assert_ne!(rig.driver.state(), DriverState::Faulted);
    let events: Vec<BusEvent> = rig.monitor.events.iter().copied().collect();
    assert_well_formed(&events);
}

#[test]
fn absent_device_faults_after_one_addressing_attempt() {
    let target = SimTarget::new(0x48).present(false);
    let driver = AdcDriver::new(AdcConfigBuilder::new().build(), IntervalTrigger::new(100));
    let mut rig = Rig::new(engine(), target, driver);

    for _ in 0..10_000 {
        rig.tick();
        if rig.driver.state() == DriverState::Faulted {
            break;
        }
    }
    assert_eq!(rig.driver.state(), DriverState::Faulted);
    assert!(rig.driver.device_error());

    // Exactly one attempt on the wire: START, unacknowledged address,
    // closing STOP. No data bytes follow the NACK.
    let events: Vec<BusEvent> = rig.monitor.events.iter().copied().collect();
    assert_eq!(
        events,
        [
            BusEvent::Start,
            BusEvent::Byte {
                value: 0x90,
                acked: false
            },
            BusEvent::Stop,
        ]
    );

    // Silent until an external reset.
    rig.monitor.clear();
    rig.run(20_000);
    assert!(rig.monitor.events.is_empty());

    // Reset retries the init write.
    rig.driver.reset();
    rig.run(5_000);
    assert!(!rig.monitor.events.is_empty());
}

#[test]
fn clock_stretching_target_still_completes_reads() {
    let target = SimTarget::new(0x48)
        .conversion_period(2_000)
        .ramp(-5, -5)
        .stretch(7);
    let driver = AdcDriver::new(AdcConfigBuilder::new().build(), IntervalTrigger::new(3_000));
    let mut rig = Rig::new(engine(), target, driver);

    let sample = rig.run_for_sample(200_000).expect("stretched read failed");
    assert_eq!(sample.sequence, 1);
    assert_eq!(sample.value % 5, 0);
}

#[test]
fn blocking_facade_round_trips_registers_through_the_target() {
    let mut i2c = BlockingI2c::new(engine(), Bus::new(), SimTarget::new(0x48));

    // Threshold register write, then pointer write + repeated-START read.
    i2c.write(0x48, &[REG_LO_THRESH, 0x12, 0x34]).unwrap();
    assert_eq!(i2c.member.register(REG_LO_THRESH), 0x1234);

    let mut buffer = [0u8; 2];
    i2c.write_read(0x48, &[REG_LO_THRESH], &mut buffer).unwrap();
    assert_eq!(buffer, [0x12, 0x34]);
}

#[test]
fn blocking_facade_maps_missing_device_to_address_nack() {
    let mut i2c = BlockingI2c::new(engine(), Bus::new(), SimTarget::new(0x48).present(false));
    let err = i2c.write(0x48, &[0x01, 0xC2, 0xE0]).unwrap_err();
    assert_eq!(err, bitmaster_ddk::i2c::Error::AddressNack);
    // The facade closed the bus with STOP.
    assert!(i2c.bus.scl.is_high());
    assert!(i2c.bus.sda.is_high());
}
