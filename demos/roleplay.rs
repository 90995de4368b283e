use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use tokio::sync::mpsc;
use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;

use roleplay_realtime::types::audio::Voice;
use roleplay_realtime::{
    CaptureSource, Config, PlaybackId, PlaybackSink, SessionConfig, VoiceSession, WsConnect,
};
use roleplay_realtime_utils as utils;

const INPUT_CHUNK_SIZE: usize = 1024;
const OUTPUT_CHUNK_SIZE: usize = 1024;

const PERSONA: &str = "You are Alex Chen, a busy operations director evaluating \
a vendor pitch. You are skeptical but fair: ask pointed questions about price, \
rollout effort, and proof, and warm up only if the caller earns it.";

/// Microphone capture: downmixes to mono, resamples from the device rate to
/// the requested rate, and forwards each window to the session.
#[derive(Default)]
struct DeviceCapture {
    stream: Option<cpal::Stream>,
}

impl CaptureSource for DeviceCapture {
    fn open(&mut self, sample_rate: u32, frames: mpsc::Sender<Vec<f32>>) -> anyhow::Result<()> {
        let device = utils::device::default_input()?;
        let default_config = device.default_input_config()?;
        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
        };
        tracing::info!("input: device={:?}, config={:?}", device.name()?, config);

        let channels = config.channels as usize;
        let mut resampler = utils::audio::create_resampler(
            config.sample_rate.0 as f64,
            sample_rate as f64,
            INPUT_CHUNK_SIZE,
        )?;
        let data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mono: Vec<f32> = data.chunks(channels).map(|frame| frame[0]).collect();
            let resampled = utils::audio::resample_all(&mut resampler, &mono);
            if frames.try_send(resampled).is_err() {
                tracing::warn!("capture channel full; dropping a window");
            }
        };
        let stream = device.build_input_stream(
            &config,
            data_fn,
            |err| tracing::error!("input stream error: {}", err),
            None,
        )?;
        stream.play()?;
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.stream = None;
        Ok(())
    }
}

struct Clip {
    id: PlaybackId,
    /// First output frame this clip is audible on.
    start: u64,
    samples: Vec<f32>,
}

#[derive(Default)]
struct MixerState {
    frames_done: u64,
    next_id: PlaybackId,
    clips: Vec<Clip>,
}

/// Speaker output: a timeline mixer over the device clock. Clips are placed
/// at absolute frame offsets, summed in the output callback, and reported
/// back once the clock passes their end.
struct DevicePlayback {
    stream: Option<cpal::Stream>,
    state: Arc<Mutex<MixerState>>,
    source_rate: u32,
    device_rate: f64,
}

impl DevicePlayback {
    fn new() -> Self {
        Self {
            stream: None,
            state: Arc::new(Mutex::new(MixerState::default())),
            source_rate: 0,
            device_rate: 0.0,
        }
    }
}

impl PlaybackSink for DevicePlayback {
    fn open(&mut self, sample_rate: u32, ended: mpsc::Sender<PlaybackId>) -> anyhow::Result<()> {
        let device = utils::device::default_output()?;
        let default_config = device.default_output_config()?;
        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
        };
        tracing::info!("output: device={:?}, config={:?}", device.name()?, config);

        self.source_rate = sample_rate;
        self.device_rate = config.sample_rate.0 as f64;

        let channels = config.channels as usize;
        let state = self.state.clone();
        let data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let mut mixer = state.lock().unwrap();
            let frames = data.len() / channels;
            for i in 0..frames {
                let t = mixer.frames_done + i as u64;
                let mut sample = 0.0;
                for clip in &mixer.clips {
                    if t >= clip.start {
                        let offset = (t - clip.start) as usize;
                        if offset < clip.samples.len() {
                            sample += clip.samples[offset];
                        }
                    }
                }
                for ch in 0..channels {
                    data[i * channels + ch] = sample;
                }
            }
            mixer.frames_done += frames as u64;
            let now = mixer.frames_done;
            mixer.clips.retain(|clip| {
                let finished = now >= clip.start + clip.samples.len() as u64;
                if finished {
                    // a lost notice leaves the handle queued until the next
                    // interruption
                    if let Err(e) = ended.try_send(clip.id) {
                        tracing::warn!("completion notice for playback {} dropped: {}", clip.id, e);
                    }
                }
                !finished
            });
        };
        let stream = device.build_output_stream(
            &config,
            data_fn,
            |err| tracing::error!("output stream error: {}", err),
            None,
        )?;
        stream.play()?;
        self.stream = Some(stream);
        Ok(())
    }

    fn current_time(&self) -> f64 {
        if self.device_rate == 0.0 {
            return 0.0;
        }
        self.state.lock().unwrap().frames_done as f64 / self.device_rate
    }

    fn schedule(&mut self, samples: Vec<f32>, start: f64) -> anyhow::Result<PlaybackId> {
        // a fresh resampler per clip keeps history from bleeding across clips
        let mut resampler = utils::audio::create_resampler(
            self.source_rate as f64,
            self.device_rate,
            OUTPUT_CHUNK_SIZE,
        )?;
        let samples = utils::audio::resample_all(&mut resampler, &samples);

        let mut mixer = self.state.lock().unwrap();
        mixer.next_id += 1;
        let id = mixer.next_id;
        mixer.clips.push(Clip {
            id,
            start: (start.max(0.0) * self.device_rate).round() as u64,
            samples,
        });
        Ok(id)
    }

    fn stop(&mut self, id: PlaybackId) {
        self.state.lock().unwrap().clips.retain(|clip| clip.id != id);
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.stream = None;
        self.state.lock().unwrap().clips.clear();
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv_override().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let config = SessionConfig::new(PERSONA).with_voice(Voice::Puck);
    let connector = WsConnect::new(Config::new());
    let mut session = VoiceSession::new(
        config,
        DeviceCapture::default(),
        DevicePlayback::new(),
        connector,
    );

    session.start().await?;

    let handle = session.handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        println!("Received Ctrl-C, shutting down...");
        handle.stop();
    });

    let mut status = session.handle();
    tokio::spawn(async move {
        while let Some(s) = status.changed().await {
            tracing::info!("session: {:?} (active: {})", s.state, s.active);
        }
    });

    // cpal streams are not Send, so the session stays on the main task
    session.run().await;

    if let Some(e) = session.last_error() {
        anyhow::bail!("session ended with an error: {}", e);
    }
    println!("Session closed.");
    Ok(())
}
