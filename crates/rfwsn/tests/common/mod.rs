// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Shared fixtures for the integration tests
#![allow(dead_code)]

use rfwsn::oad::{build_image, ImageHeader, OadStorage, SimFlash};
use rfwsn::{Concentrator, NodeEvent, WsnConfig};
use std::time::{Duration, Instant};

pub const PAGE: usize = 256;
pub const SLOT_PAGES: usize = 4;

/// Image offered to the nodes: 16-byte header plus 144 bytes, 5 blocks
pub fn test_image() -> Vec<u8> {
    build_image(0x0101, *b"WSN1", &[0x3C; 144])
}

/// `RUST_LOG=rfwsn=debug cargo test` shows the protocol traces
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Empty image slot on a device running `running_version`
pub fn store(running_version: u16) -> OadStorage<SimFlash> {
    init_logging();
    let running = ImageHeader {
        version: running_version,
        ..ImageHeader::default()
    };
    OadStorage::new(SimFlash::new(SLOT_PAGES, PAGE), 0, SLOT_PAGES * PAGE, running).unwrap()
}

/// Slot already holding `image`, ready to serve
pub fn staged_store(running_version: u16, image: &[u8]) -> OadStorage<SimFlash> {
    let mut store = store(running_version);
    store.stage_image(image).unwrap();
    store
}

/// Defaults with a fast sampling node at 0x21
pub fn fast_config() -> WsnConfig {
    let mut config = WsnConfig::default();
    config.node.address = Some(0x21);
    config.node.sample_period_ms = 40;
    config
}

/// First notification starting with `prefix`, skipping the others
pub fn expect_notification(
    concentrator: &Concentrator,
    prefix: &str,
    timeout: Duration,
) -> Option<String> {
    let deadline = Instant::now() + timeout;
    while let Ok(line) = concentrator.notifications().recv_deadline(deadline) {
        if line.starts_with(prefix) {
            return Some(line);
        }
    }
    None
}

/// First node event matching `wanted`
pub fn expect_event<F>(
    events: &crossbeam::channel::Receiver<NodeEvent>,
    wanted: F,
    timeout: Duration,
) -> Option<NodeEvent>
where
    F: Fn(&NodeEvent) -> bool,
{
    let deadline = Instant::now() + timeout;
    while let Ok(event) = events.recv_deadline(deadline) {
        if wanted(&event) {
            return Some(event);
        }
    }
    None
}

/// Poll `condition` until it holds or `timeout` expires
pub fn wait_for<F: FnMut() -> bool>(mut condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
