/// Registers FFmpeg components (formats, devices such as lavfi). Safe to call repeatedly.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod audio_mixer;
pub mod channel_layout;
pub mod codec;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod input;
pub mod merger;
pub mod output;
pub mod packet;
pub mod resampler;
pub mod stream;
pub mod toolkit;
mod worker;

pub use config::MergeOptions;
pub use error::{ErrorKind, MergeError};
pub use merger::{MergeEvent, MergeState, MergerDelegate, StreamMerger};
