// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sampling task: sensor readings into the node data queue

use super::sensor::Sensor;
use super::{NodeEvent, SampleQueue};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Requests served by the sampling task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SamplerControl {
    Start,
    Stop,
    /// Skip sampling for the given time
    Pause(Duration),
    Shutdown,
}

pub(crate) struct Sampler<Sn: Sensor> {
    sensor: Sn,
    queue: Arc<SampleQueue>,
    control: Receiver<SamplerControl>,
    events: Sender<NodeEvent>,
    sample_period: Duration,
    overrun_sleep: Duration,
    sampling: bool,
    overrun: bool,
}

impl<Sn: Sensor> Sampler<Sn> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        sensor: Sn,
        queue: Arc<SampleQueue>,
        control: Receiver<SamplerControl>,
        events: Sender<NodeEvent>,
        sample_period: Duration,
        overrun_sleep: Duration,
        sampling: bool,
    ) -> Self {
        Self {
            sensor,
            queue,
            control,
            events,
            sample_period,
            overrun_sleep,
            sampling,
            overrun: false,
        }
    }

    /// Current period, throttled while the queue overruns
    fn period(&self) -> Duration {
        if self.overrun {
            self.overrun_sleep
        } else {
            self.sample_period
        }
    }

    pub(crate) fn run(mut self) {
        log::debug!("[sampler] started (sampling: {})", self.sampling);
        let mut next = Instant::now() + self.period();
        loop {
            let control = if self.sampling {
                self.control.recv_deadline(next)
            } else {
                self.control
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected)
            };
            match control {
                Ok(SamplerControl::Start) => {
                    if !self.sampling {
                        log::info!("[sampler] sampling started");
                        self.sampling = true;
                        next = Instant::now() + self.period();
                    }
                }
                Ok(SamplerControl::Stop) => {
                    if self.sampling {
                        log::info!("[sampler] sampling stopped");
                    }
                    self.sampling = false;
                }
                Ok(SamplerControl::Pause(duration)) => {
                    log::debug!("[sampler] sleeping for {:?}", duration);
                    next = Instant::now() + duration;
                }
                Ok(SamplerControl::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    self.sample_once();
                    next = Instant::now() + self.period();
                }
            }
        }
        log::debug!("[sampler] stopped");
    }

    /// Take one reading straight into the queue tail
    fn sample_once(&mut self) {
        let Some(mut slot) = self.queue.lazy_push_begin() else {
            if !self.overrun {
                self.overrun = true;
                log::warn!(
                    "[sampler] overrun detected, sampling every {:?}",
                    self.overrun_sleep
                );
                let _ = self.events.send(NodeEvent::Overrun(true));
            }
            return;
        };

        let Some((packet_type, len)) = self.sensor.sample(slot.data.buffer_mut()) else {
            slot.cancel();
            return;
        };
        if !slot.data.set_len(len) {
            slot.cancel();
            return;
        }
        slot.packet_type = packet_type;
        slot.commit();

        if self.overrun {
            self.overrun = false;
            log::info!("[sampler] overrun released");
            let _ = self.events.send(NodeEvent::Overrun(false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::sensor::SimSensor;
    use crate::node::SAMPLE_SLOT;
    use crossbeam::channel::unbounded;

    fn sampler(sensor: SimSensor) -> (Sampler<SimSensor>, Arc<SampleQueue>, Receiver<NodeEvent>) {
        let queue = Arc::new(SampleQueue::new());
        let (_control_tx, control) = unbounded();
        let (events_tx, events) = unbounded();
        let sampler = Sampler::new(
            sensor,
            Arc::clone(&queue),
            control,
            events_tx,
            Duration::from_millis(10),
            Duration::from_millis(50),
            true,
        );
        (sampler, queue, events)
    }

    #[test]
    fn test_overrun_detected_and_released() {
        let (mut sampler, queue, events) = sampler(SimSensor::raw(20, 3));
        for _ in 0..queue.capacity() {
            sampler.sample_once();
        }
        assert_eq!(queue.count(), queue.capacity());
        assert!(events.try_recv().is_err());
        assert_eq!(sampler.period(), Duration::from_millis(10));

        sampler.sample_once();
        sampler.sample_once();
        assert_eq!(events.try_recv().ok(), Some(NodeEvent::Overrun(true)));
        assert!(events.try_recv().is_err());
        assert_eq!(sampler.period(), Duration::from_millis(50));

        queue.try_pop();
        sampler.sample_once();
        assert_eq!(events.try_recv().ok(), Some(NodeEvent::Overrun(false)));
        assert_eq!(sampler.period(), Duration::from_millis(10));
    }

    #[test]
    fn test_reading_too_long_is_discarded() {
        let (mut sampler, queue, _events) = sampler(SimSensor::raw(SAMPLE_SLOT + 1, 3));
        sampler.sample_once();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_sample_lands_in_queue() {
        let (mut sampler, queue, _events) = sampler(SimSensor::adc(9));
        sampler.sample_once();
        let sample = queue.try_pop().unwrap();
        assert_eq!(sample.packet_type, crate::packet::PacketType::AdcSensor);
        assert_eq!(sample.data.len(), 2);
        assert!(sample.to_body().is_some());
    }
}
