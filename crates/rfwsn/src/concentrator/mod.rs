// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Concentrator runtime
//!
//! ```text
//!            +-------------+   AppRequest    +-------------------+
//!  radio --->| radio task  |---------------->| application task  |<--- console lines
//!            |  (owns R)   |<--- AckReply ---|  NodeTable         |<--- image uploads
//!            +-------------+                 |  OadServer<S>      |---> notifications
//!                  ^        RadioCommand     |  pending downlinks |
//!                  +-------------------------+-------------------+
//! ```
//!
//! Each task owns its state; the [`Concentrator`] handle only talks to them
//! through channels.

mod app;
mod radio_task;
mod stats;

pub use app::SerialLink;
pub use stats::{RxCounters, RxStats};

use crate::config::WsnConfig;
use crate::error::Result;
use crate::node_table::NodeRecord;
use crate::oad::{ImageStore, OadServer, OadTransferState};
use crate::radio::Radio;
use app::{AppRequest, AppTask};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use radio_task::{RadioCommand, RadioTask};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Console notifications kept while nobody reads them
const NOTIFICATION_BACKLOG: usize = 256;

/// Handle to a running concentrator
pub struct Concentrator {
    app: Sender<AppRequest>,
    radio: Sender<RadioCommand>,
    notifications: Receiver<String>,
    threads: Vec<JoinHandle<()>>,
}

impl Concentrator {
    /// Configure `radio`, then start the radio and application tasks
    ///
    /// `store` holds the image served to nodes.
    pub fn spawn<R, S>(mut radio: R, store: S, config: &WsnConfig) -> Result<Self>
    where
        R: Radio + 'static,
        S: ImageStore + 'static,
    {
        config.validate()?;
        radio.set_frequency(config.radio.frequency_hz)?;
        radio.set_power(config.radio.power_dbm)?;

        let (app_tx, app_rx) = unbounded();
        let (radio_tx, radio_rx) = unbounded();
        let (note_tx, note_rx) = bounded(NOTIFICATION_BACKLOG);

        let radio_task = RadioTask::new(
            radio,
            radio_rx,
            app_tx.clone(),
            Duration::from_millis(config.concentrator.reply_timeout_ms),
        );
        let app_task = AppTask::new(
            app_rx,
            radio_tx.clone(),
            note_tx,
            OadServer::new(store, config.oad_settings()),
            Duration::from_millis(config.concentrator.tick_ms),
        );

        let mut threads = Vec::with_capacity(2);
        threads.push(
            thread::Builder::new()
                .name("rfwsn-app".to_string())
                .spawn(move || app_task.run())?,
        );
        let radio_thread = thread::Builder::new()
            .name("rfwsn-radio".to_string())
            .spawn(move || radio_task.run());
        match radio_thread {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                let _ = app_tx.send(AppRequest::Shutdown);
                return Err(e.into());
            }
        }

        log::info!(
            "[concentrator] running at {} Hz, {} dBm",
            config.radio.frequency_hz,
            config.radio.power_dbm
        );
        Ok(Self {
            app: app_tx,
            radio: radio_tx,
            notifications: note_rx,
            threads,
        })
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> AppRequest) -> Result<T> {
        let (tx, rx) = bounded(1);
        self.app.send(make(tx))?;
        Ok(rx.recv()?)
    }

    /// Run one console line; returns the reply line
    pub fn console(&self, line: &str) -> Result<String> {
        self.request(|reply| AppRequest::Console {
            line: line.to_string(),
            reply,
        })
    }

    /// Asynchronous console lines (`+DATA`, `+FWVER`, `+UPDATE`, `+COUNT`)
    pub fn notifications(&self) -> &Receiver<String> {
        &self.notifications
    }

    /// Pull a new image from a host over `link` into the image store
    ///
    /// Returns the number of blocks received. Refused while a transfer runs.
    pub fn upload_image<L: SerialLink + 'static>(&self, link: L) -> Result<u16> {
        self.request(|reply| AppRequest::Upload {
            link: Box::new(link),
            reply,
        })?
    }

    /// Snapshot of the node table
    pub fn nodes(&self) -> Result<Vec<NodeRecord>> {
        self.request(AppRequest::Nodes)
    }

    pub fn oad_state(&self) -> Result<OadTransferState> {
        self.request(AppRequest::OadState)
    }

    pub fn stats(&self) -> Result<RxStats> {
        self.request(AppRequest::Stats)
    }

    /// Stop both tasks and wait for them
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.radio.send(RadioCommand::Shutdown);
        let _ = self.app.send(AppRequest::Shutdown);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("[concentrator] task panicked");
            }
        }
    }
}

impl Drop for Concentrator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Concentrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Concentrator")
            .field("tasks", &self.threads.len())
            .finish()
    }
}
