mod client;
mod session;

pub use roleplay_realtime_types as types;

pub use client::{connect, connect_with_config, Client, ClientTx, Config, ConfigBuilder, ServerRx};
pub use session::{
    CaptureSource, Connect, Endpoint, PlaybackId, PlaybackScheduler, PlaybackSink, SessionConfig,
    SessionError, SessionHandle, SessionState, Status, VoiceSession, WsConnect,
    CAPTURE_FRAME_SAMPLES,
};

#[cfg(feature = "utils")]
pub use roleplay_realtime_utils as utils;
