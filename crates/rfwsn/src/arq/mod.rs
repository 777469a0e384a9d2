// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Acknowledged delivery with retries (ARQ)
//!
//! Each send is an [`ArqOperation`]: a small state machine driven by the
//! engine with transmit, ack and timeout events.
//!
//! ```text
//! Idle -> Sending -> AwaitingAck -> Success
//!            ^            |
//!            |            +-> Retrying --+   (retries_done < max_retries)
//!            +---------------------------+
//!                         +-> Failed         (retries exhausted)
//! ```
//!
//! Retransmissions reuse the frame encoded when the operation was created.
//! The [`ArqEngine`] runs one operation at a time against a [`Radio`]; the
//! [`ArqGate`] is the lock that serializes concurrent senders.
//!
//! [`Radio`]: crate::radio::Radio

mod engine;

pub use engine::{ArqEngine, ArqGate, ArqPermit, ArqRequest, ArqSettings, ArqStats};

use crate::error::{Error, Result};
use crate::packet::{AckCommand, Packet};
use std::time::Duration;

/// Default retries after the first transmission
pub const DEFAULT_MAX_RETRIES: u8 = 2;

/// Default receive window for the ack
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(160);

/// Operation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArqState {
    Idle,
    Sending,
    AwaitingAck,
    Retrying,
    Success,
    Failed,
}

/// Outcome delivered to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArqResult {
    Pending,
    Success,
    Failed,
    FailedNotConnected,
}

/// Input to [`ArqOperation::on_event`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArqEvent {
    /// Frame left the radio
    Transmitted,
    /// Radio refused the frame
    TransmitFailed,
    /// Valid ack from the destination
    AckReceived {
        command: Option<AckCommand>,
        pending: bool,
    },
    /// Receive window elapsed
    Timeout,
    /// Malformed or foreign frame during the receive window
    InvalidFrame,
}

/// What the engine must do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArqAction {
    Transmit,
    AwaitAck(Duration),
    Resolve(ArqResult),
    /// Event does not apply in the current state
    Ignore,
}

/// One send-and-await-ack exchange
#[derive(Debug, Clone)]
pub struct ArqOperation {
    dest: u8,
    frame: Vec<u8>,
    retries_done: u8,
    max_retries: u8,
    ack_timeout: Duration,
    state: ArqState,
    result: ArqResult,
    ack_command: Option<AckCommand>,
    follow_up_pending: bool,
}

impl ArqOperation {
    pub fn new(dest: u8, frame: Vec<u8>, max_retries: u8, ack_timeout: Duration) -> Self {
        Self {
            dest,
            frame,
            retries_done: 0,
            max_retries,
            ack_timeout,
            state: ArqState::Idle,
            result: ArqResult::Pending,
            ack_command: None,
            follow_up_pending: false,
        }
    }

    pub fn dest(&self) -> u8 {
        self.dest
    }

    /// Encoded frame, identical on every retransmission
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    pub fn state(&self) -> ArqState {
        self.state
    }

    pub fn result(&self) -> ArqResult {
        self.result
    }

    pub fn retries_done(&self) -> u8 {
        self.retries_done
    }

    /// Command piggy-backed on the ack, once resolved
    pub fn take_ack_command(&mut self) -> Option<AckCommand> {
        self.ack_command.take()
    }

    /// Ack announced a follow-up frame
    pub fn follow_up_pending(&self) -> bool {
        self.follow_up_pending
    }

    pub fn start(&mut self) -> ArqAction {
        if self.state != ArqState::Idle {
            return ArqAction::Ignore;
        }
        self.state = ArqState::Sending;
        ArqAction::Transmit
    }

    /// Resolve immediately without transmitting
    pub fn reject_not_connected(&mut self) -> ArqAction {
        self.state = ArqState::Failed;
        self.resolve(ArqResult::FailedNotConnected)
    }

    pub fn on_event(&mut self, event: ArqEvent) -> ArqAction {
        match (self.state, event) {
            (ArqState::Sending | ArqState::Retrying, ArqEvent::Transmitted) => {
                self.state = ArqState::AwaitingAck;
                ArqAction::AwaitAck(self.ack_timeout)
            }
            // Radio errors are folded into the retry decision
            (ArqState::Sending | ArqState::Retrying, ArqEvent::TransmitFailed) => self.retry_or_fail(),
            (ArqState::AwaitingAck, ArqEvent::AckReceived { command, pending }) => {
                self.state = ArqState::Success;
                self.ack_command = command;
                self.follow_up_pending = pending;
                self.resolve(ArqResult::Success)
            }
            (ArqState::AwaitingAck, ArqEvent::Timeout | ArqEvent::InvalidFrame) => {
                self.retry_or_fail()
            }
            _ => ArqAction::Ignore,
        }
    }

    fn retry_or_fail(&mut self) -> ArqAction {
        if self.retries_done < self.max_retries {
            self.retries_done += 1;
            self.state = ArqState::Retrying;
            ArqAction::Transmit
        } else {
            self.state = ArqState::Failed;
            self.resolve(ArqResult::Failed)
        }
    }

    fn resolve(&mut self, result: ArqResult) -> ArqAction {
        self.result = result;
        ArqAction::Resolve(result)
    }
}

/// Result of [`ArqEngine::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArqReport {
    pub result: ArqResult,
    pub retries_done: u8,
    /// Frames put on the radio for this operation
    pub transmissions: u8,
    /// Side-channel command carried by the ack
    pub ack_command: Option<AckCommand>,
    /// Frame the peer sent right after an ack flagged pending
    pub follow_up: Option<Packet>,
}

impl ArqReport {
    pub fn is_success(&self) -> bool {
        self.result == ArqResult::Success
    }

    /// Map the outcome onto the crate error taxonomy
    pub fn into_result(self) -> Result<Self> {
        match self.result {
            ArqResult::Success => Ok(self),
            ArqResult::FailedNotConnected => Err(Error::NotConnected),
            ArqResult::Failed => Err(Error::SendFailed {
                retries: self.retries_done,
            }),
            ArqResult::Pending => Err(Error::AckTimeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op() -> ArqOperation {
        ArqOperation::new(0, vec![1, 2, 3], 2, DEFAULT_ACK_TIMEOUT)
    }

    #[test]
    fn test_operation_success_path() {
        let mut op = op();
        assert_eq!(op.start(), ArqAction::Transmit);
        assert_eq!(op.state(), ArqState::Sending);
        assert_eq!(
            op.on_event(ArqEvent::Transmitted),
            ArqAction::AwaitAck(DEFAULT_ACK_TIMEOUT)
        );
        let action = op.on_event(ArqEvent::AckReceived {
            command: None,
            pending: false,
        });
        assert_eq!(action, ArqAction::Resolve(ArqResult::Success));
        assert_eq!(op.retries_done(), 0);
    }

    #[test]
    fn test_operation_exhausts_retries() {
        let mut op = op();
        let mut transmits = 0;
        let mut action = op.start();
        loop {
            action = match action {
                ArqAction::Transmit => {
                    transmits += 1;
                    op.on_event(ArqEvent::Transmitted)
                }
                ArqAction::AwaitAck(_) => op.on_event(ArqEvent::Timeout),
                ArqAction::Resolve(result) => {
                    assert_eq!(result, ArqResult::Failed);
                    break;
                }
                ArqAction::Ignore => panic!("unexpected ignore"),
            };
        }
        assert_eq!(transmits, 3);
        assert_eq!(op.retries_done(), 2);
        assert_eq!(op.state(), ArqState::Failed);
    }

    #[test]
    fn test_operation_invalid_frame_triggers_retry() {
        let mut op = op();
        op.start();
        op.on_event(ArqEvent::Transmitted);
        assert_eq!(op.on_event(ArqEvent::InvalidFrame), ArqAction::Transmit);
        assert_eq!(op.state(), ArqState::Retrying);
        assert_eq!(op.retries_done(), 1);
    }

    #[test]
    fn test_operation_transmit_failure_retries() {
        let mut op = ArqOperation::new(0, vec![], 0, DEFAULT_ACK_TIMEOUT);
        op.start();
        assert_eq!(
            op.on_event(ArqEvent::TransmitFailed),
            ArqAction::Resolve(ArqResult::Failed)
        );
    }

    #[test]
    fn test_operation_ignores_stray_events() {
        let mut op = op();
        assert_eq!(op.on_event(ArqEvent::Timeout), ArqAction::Ignore);
        op.start();
        assert_eq!(
            op.on_event(ArqEvent::AckReceived {
                command: None,
                pending: false
            }),
            ArqAction::Ignore
        );
        assert_eq!(op.start(), ArqAction::Ignore);
    }

    #[test]
    fn test_not_connected_report() {
        let mut op = op();
        assert_eq!(
            op.reject_not_connected(),
            ArqAction::Resolve(ArqResult::FailedNotConnected)
        );
        let report = ArqReport {
            result: op.result(),
            retries_done: 0,
            transmissions: 0,
            ack_command: None,
            follow_up: None,
        };
        assert!(matches!(report.into_result(), Err(Error::NotConnected)));
    }

    #[test]
    fn test_unresolved_report_is_ack_timeout() {
        let report = ArqReport {
            result: ArqResult::Pending,
            retries_done: 1,
            transmissions: 2,
            ack_command: None,
            follow_up: None,
        };
        assert!(matches!(report.into_result(), Err(Error::AckTimeout)));
    }
}
