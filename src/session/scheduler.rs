use std::collections::HashSet;

use crate::session::io::{PlaybackId, PlaybackSink};

/// Keeps inbound chunks playing back-to-back on the sink clock.
///
/// `next_start` is the timestamp the next chunk begins at. It is pulled
/// forward to the sink's current time before each schedule, so chunks that
/// arrive faster than they play queue up seamlessly while a chunk arriving
/// after a silent gap starts immediately. Every scheduled playback sits in
/// the active set until it either finishes naturally or is interrupted,
/// never both.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start: f64,
    active: HashSet<PlaybackId>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules one decoded chunk for gapless playback and returns its
    /// handle.
    pub fn schedule<S: PlaybackSink>(
        &mut self,
        sink: &mut S,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> anyhow::Result<PlaybackId> {
        let now = sink.current_time();
        if self.next_start < now {
            self.next_start = now;
        }
        let duration = samples.len() as f64 / f64::from(sample_rate);
        let id = sink.schedule(samples, self.next_start)?;
        self.active.insert(id);
        self.next_start += duration;
        Ok(id)
    }

    /// Natural end of one playback. Forced stops go through [`Self::interrupt`].
    pub fn on_ended(&mut self, id: PlaybackId) {
        self.active.remove(&id);
    }

    /// Stops everything scheduled or playing and forgets the queued
    /// timeline: the next chunk starts at the present.
    pub fn interrupt<S: PlaybackSink>(&mut self, sink: &mut S) {
        for id in self.active.drain() {
            sink.stop(id);
        }
        self.next_start = sink.current_time();
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }
}
