pub mod audio;
pub mod events;
pub mod setup;

pub use events::{ClientMessage, InboundEvent, MediaBlob, RealtimeInput, ServerMessage};
pub use setup::{Modality, Setup, SetupConfigurator};
