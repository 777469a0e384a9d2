// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Node to concentrator data path over the simulated air: framing, ack,
// retries and the concentrator's view of the node

mod common;

use rfwsn::arq::ArqSettings;
use rfwsn::packet::PacketBody;
use rfwsn::radio::sim::DEFAULT_SIM_RSSI;
use rfwsn::radio::{Radio, SimAir, SimRadio};
use rfwsn::node::SimSensor;
use rfwsn::packet::{InvalidPacket, NodeCommand};
use rfwsn::{ArqEngine, ArqRequest, ArqResult, Concentrator, Error, Node, WsnConfig};
use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(2);

fn connected_engine(air: &SimAir, address: u8) -> ArqEngine<SimRadio> {
    let mut engine = ArqEngine::new(air.attach(), WsnConfig::default().arq_settings());
    engine.connect(address).unwrap();
    engine
}

#[test]
fn test_raw_data_is_acked_and_reported() {
    let air = SimAir::new();
    let concentrator = Concentrator::spawn(air.attach(), common::store(0x0100), &WsnConfig::default()).unwrap();
    let mut engine = connected_engine(&air, 0x21);

    let payload: Vec<u8> = (1..=10).collect();
    let report = engine
        .send(&ArqRequest::to_concentrator(PacketBody::RawData(payload)))
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.transmissions, 1);
    assert_eq!(report.ack_command, None);
    assert_eq!(report.follow_up, None);

    let line = common::expect_notification(&concentrator, "+DATA:", TIMEOUT).unwrap();
    assert!(line.ends_with(",33,10,0102030405060708090A"), "{}", line);

    let nodes = concentrator.nodes().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].address, 0x21);
    assert_eq!(nodes[0].rssi, DEFAULT_SIM_RSSI);

    // header 4 + CRC 2 + data 10
    let stats = concentrator.stats().unwrap();
    assert_eq!(stats.interval.received, 1);
    assert_eq!(stats.interval.successful, 1);
    assert_eq!(stats.interval.bytes, 16);
}

#[test]
fn test_sensor_readings_update_node_record() {
    let air = SimAir::new();
    let concentrator = Concentrator::spawn(air.attach(), common::store(0x0100), &WsnConfig::default()).unwrap();
    let mut engine = connected_engine(&air, 0x30);

    let reading = rfwsn::packet::DualModeSensorData {
        adc_value: 0x0ABC,
        battery_mv: 3000,
        time_100ms: 42,
        button: 1,
    };
    let report = engine
        .send(&ArqRequest::to_concentrator(PacketBody::DualModeSensor(reading)))
        .unwrap();
    assert!(report.is_success());

    let nodes = concentrator.nodes().unwrap();
    assert_eq!(nodes[0].latest_value, 0x0ABC);
    assert_eq!(nodes[0].button, 1);
    assert_eq!(
        concentrator.console("AT+STATUS:0x30").unwrap(),
        format!("+STATUS:OK,RSSI={},VALUE=2748,BUTTON=1,FW=", DEFAULT_SIM_RSSI)
    );
}

#[test]
fn test_lost_ack_is_retried() {
    let air = SimAir::new();
    let concentrator_radio = air.attach();
    let concentrator_station = concentrator_radio.station();
    let concentrator = Concentrator::spawn(concentrator_radio, common::store(0x0100), &WsnConfig::default()).unwrap();
    let mut engine = connected_engine(&air, 0x21);

    let mut dropped = false;
    air.set_loss(move |tx| {
        if tx.station == concentrator_station && !dropped {
            dropped = true;
            return true;
        }
        false
    });

    let report = engine
        .send(&ArqRequest::to_concentrator(PacketBody::RawData(vec![0xAA; 4])))
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.retries_done, 1);
    assert_eq!(report.transmissions, 2);

    // the retransmission is a duplicate from the concentrator's side
    assert!(common::wait_for(
        || concentrator.stats().unwrap().interval.received == 2,
        TIMEOUT
    ));
}

#[test]
fn test_send_fails_without_concentrator() {
    let air = SimAir::new();
    let mut engine = connected_engine(&air, 0x21);

    let report = engine
        .send(&ArqRequest::to_concentrator(PacketBody::RawData(vec![1])))
        .unwrap();
    assert_eq!(report.result, ArqResult::Failed);
    assert_eq!(report.transmissions, 3);
    assert!(matches!(report.into_result(), Err(Error::SendFailed { retries: 2 })));
}

#[test]
fn test_node_queue_fills_without_concentrator() {
    let air = SimAir::new();
    let mut config = common::fast_config();
    config.node.auto_start = false;
    let node = Node::spawn(air.attach(), SimSensor::adc(5), common::store(0x0100), &config).unwrap();

    let reading = PacketBody::RawData(vec![0xAB; 4]);
    for _ in 0..rfwsn::node::NODE_QUEUE_SLOTS - 1 {
        node.enqueue(&reading).unwrap();
    }
    assert!(matches!(node.enqueue(&reading), Err(Error::QueueFull)));
    assert!(matches!(
        node.enqueue(&PacketBody::RawData(vec![0; 80])),
        Err(Error::InvalidPacket(InvalidPacket::LengthOverflow))
    ));
    // the unacked head stays queued
    assert_eq!(node.queue_count(), rfwsn::node::NODE_QUEUE_SLOTS - 1);
    node.shutdown();
}

#[test]
fn test_send_before_connect_fails_fast() {
    let air = SimAir::new();
    let mut engine = ArqEngine::new(air.attach(), ArqSettings::default());

    let report = engine
        .send(&ArqRequest::to_concentrator(PacketBody::RawData(vec![1])))
        .unwrap();
    assert_eq!(report.result, ArqResult::FailedNotConnected);
    assert_eq!(air.transmissions(), 0);
    assert!(matches!(report.into_result(), Err(Error::NotConnected)));
}

#[test]
fn test_invalid_frame_counts_as_received_only() {
    let air = SimAir::new();
    let concentrator = Concentrator::spawn(air.attach(), common::store(0x0100), &WsnConfig::default()).unwrap();
    let mut radio = air.attach();

    radio.transmit(0x00, &[0x21, 0x01, 0x00]).unwrap();
    assert!(common::wait_for(
        || concentrator.stats().unwrap().interval.received == 1,
        TIMEOUT
    ));
    let stats = concentrator.stats().unwrap();
    assert_eq!(stats.interval.successful, 0);
    assert!(concentrator.nodes().unwrap().is_empty());
    assert_eq!(
        concentrator.console("AT+STATS").unwrap(),
        "+STATS:OK,RX=1,OK=0,BYTES=3,RATE=0,TOTAL_RX=1,TOTAL_OK=0"
    );
}

#[test]
fn test_test_reset_restarts_interval() {
    let air = SimAir::new();
    let concentrator = Concentrator::spawn(air.attach(), common::store(0x0100), &WsnConfig::default()).unwrap();
    let mut engine = connected_engine(&air, 0x21);

    for _ in 0..3 {
        let report = engine
            .send(&ArqRequest::to_concentrator(PacketBody::RawData(vec![7; 8])))
            .unwrap();
        assert!(report.is_success());
    }
    let report = engine
        .send(&ArqRequest::to_concentrator(PacketBody::TestReset))
        .unwrap();
    assert!(report.is_success());

    let stats = concentrator.stats().unwrap();
    assert_eq!(stats.interval.received, 0);
    assert_eq!(stats.total.received, 4);
    assert_eq!(stats.total.successful, 4);
}

/// Image host that never answers, keeping the application task busy
struct StalledLink(Duration);

impl Read for StalledLink {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        thread::sleep(self.0);
        Ok(0)
    }
}

impl Write for StalledLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_command_kept_when_ack_goes_out_empty() {
    let air = SimAir::new();
    let concentrator =
        Concentrator::spawn(air.attach(), common::store(0x0100), &WsnConfig::default()).unwrap();
    let mut engine = connected_engine(&air, 0x21);
    let sample = ArqRequest::to_concentrator(PacketBody::RawData(vec![1, 2, 3]));
    assert!(engine.send(&sample).unwrap().is_success());

    thread::scope(|scope| {
        let upload = scope.spawn(|| concentrator.upload_image(StalledLink(Duration::from_millis(400))));
        thread::sleep(Duration::from_millis(50));
        let downlink = scope.spawn(|| concentrator.console("AT+DOWNLINK:0x21,CAFE"));
        thread::sleep(Duration::from_millis(50));

        // application task stuck in the upload: the radio task acks empty
        let report = engine.send(&sample).unwrap();
        assert!(report.is_success());
        assert_eq!(report.ack_command, None);

        assert!(upload.join().unwrap().is_err());
        assert_eq!(downlink.join().unwrap().unwrap(), "+DOWNLINK:OK");
    });

    // the late answer to the frame above could not be sent; the next ack carries it
    let report = engine.send(&sample).unwrap();
    assert!(report.is_success());
    let ack = report.ack_command.expect("downlink on the next ack");
    assert_eq!(ack.device_id, 0x21);
    assert_eq!(NodeCommand::from_ack(&ack), NodeCommand::Downlink(vec![0xCA, 0xFE]));
}
