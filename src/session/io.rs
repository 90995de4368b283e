use std::future::Future;

use tokio::sync::mpsc;

use roleplay_realtime_types::{ClientMessage, InboundEvent, Setup};

/// Identifier of one scheduled playback on the output sink.
pub type PlaybackId = u64;

/// The host microphone, owned exclusively by one session for its lifetime.
pub trait CaptureSource {
    /// Acquires the device and begins delivering mono float samples at
    /// `sample_rate`, in blocks of arbitrary size, until closed. May fail
    /// with a permission or availability error.
    fn open(&mut self, sample_rate: u32, frames: mpsc::Sender<Vec<f32>>) -> anyhow::Result<()>;

    /// Releases the device and stops delivery. Must be idempotent.
    fn close(&mut self) -> anyhow::Result<()>;
}

/// The host speaker mixer: decoded buffers are scheduled against a shared
/// monotonic clock and a completion notice is sent when one finishes
/// naturally.
pub trait PlaybackSink {
    fn open(&mut self, sample_rate: u32, ended: mpsc::Sender<PlaybackId>) -> anyhow::Result<()>;

    /// Current position of the output clock, in seconds.
    fn current_time(&self) -> f64;

    /// Schedules `samples` to begin playing at `start` seconds on the output
    /// clock.
    fn schedule(&mut self, samples: Vec<f32>, start: f64) -> anyhow::Result<PlaybackId>;

    /// Stops one scheduled or playing buffer without a completion notice.
    /// Unknown ids are ignored.
    fn stop(&mut self, id: PlaybackId);

    /// Releases the output device. Must be idempotent.
    fn close(&mut self) -> anyhow::Result<()>;
}

/// A live connection as the session sees it: outbound messages in, inbound
/// events out. Dropping `outbound` closes the connection best-effort.
pub struct Endpoint {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<InboundEvent>,
}

/// Opens a connection to the conversational endpoint.
pub trait Connect {
    fn connect(&mut self, setup: Setup) -> impl Future<Output = anyhow::Result<Endpoint>> + Send;
}
