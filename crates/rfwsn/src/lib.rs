// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! rfwsn - sub-GHz wireless sensor network stack
//!
//! Battery nodes report samples to a concentrator over a half-duplex radio
//! link; the concentrator tracks the nodes it hears and pushes firmware
//! images back to them over the same link (OAD).
//!
//! ## Layers
//!
//! ```text
//! +-------------------------------------------------------------+
//! |  console (AT+...)         concentrator / node runtimes      |
//! +-------------------------------------------------------------+
//! |  node_table   oad::{server, target, storage, upload}        |
//! +-------------------------------------------------------------+
//! |  arq (send / await ack / retry)     queue (bounded FIFO)    |
//! +-------------------------------------------------------------+
//! |  packet (framing + CRC16)                                   |
//! +-------------------------------------------------------------+
//! |  radio (collaborator trait, simulated air)                  |
//! +-------------------------------------------------------------+
//! ```
//!
//! The concentrator runs two tasks: a radio task that owns the transceiver
//! and an application task that owns the node table and OAD state. A node
//! runs a sampling task and a transfer task sharing one [`arq::ArqGate`].
//!
//! ## Quick Start
//!
//! ```ignore
//! use rfwsn::radio::SimAir;
//! use rfwsn::{Concentrator, Node, WsnConfig};
//!
//! let config = WsnConfig::default();
//! let air = SimAir::new();
//! let concentrator = Concentrator::spawn(air.attach(), store, &config)?;
//! let node = Node::spawn(air.attach(), sensor, node_store, &config)?;
//! println!("{}", concentrator.console("AT+NODES")?);
//! ```

pub mod arq;
pub mod concentrator;
pub mod config;
pub mod console;
pub mod error;
pub mod node;
pub mod node_table;
pub mod oad;
pub mod packet;
pub mod queue;
pub mod radio;

pub use arq::{ArqEngine, ArqGate, ArqReport, ArqRequest, ArqResult};
pub use concentrator::Concentrator;
pub use config::{ConfigError, WsnConfig};
pub use error::{Error, Result};
pub use node::{Node, NodeEvent};
pub use node_table::{NodeRecord, NodeTable};
pub use packet::{Packet, PacketBody, PacketHeader, PacketOptions, PacketType};
pub use queue::BoundedQueue;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
