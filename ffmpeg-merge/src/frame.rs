use ffmpeg_next::{ChannelLayout, format::Sample};

use crate::stream::CodecParameters;

/// A decoded audio frame.
#[derive(Clone)]
pub struct RawAudioFrame {
    frame: ffmpeg_next::frame::Audio,
}

impl RawAudioFrame {
    /// Allocates a frame of `samples` zeroed samples per channel in the given format.
    pub fn silence(params: &CodecParameters, samples: usize, pts: Option<i64>) -> Self {
        let mut frame =
            ffmpeg_next::frame::Audio::new(params.sample_format, samples, params.channel_layout);
        frame.set_rate(params.sample_rate);
        frame.set_pts(pts);
        for plane in 0..frame.planes() {
            frame.data_mut(plane).fill(0);
        }
        Self { frame }
    }

    pub fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.frame.set_pts(pts);
    }

    pub fn samples(&self) -> usize {
        self.frame.samples()
    }

    pub fn rate(&self) -> u32 {
        self.frame.rate()
    }

    pub fn format(&self) -> Sample {
        self.frame.format()
    }

    pub fn channel_layout(&self) -> ChannelLayout {
        self.frame.channel_layout()
    }

    pub fn channels(&self) -> u16 {
        self.frame.channels()
    }

    /// True when the frame matches the sample format, rate and layout of `params`.
    pub fn matches(&self, params: &CodecParameters) -> bool {
        self.format() == params.sample_format
            && self.rate() == params.sample_rate
            && self.channel_layout() == params.channel_layout
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::frame::Audio {
        &mut self.frame
    }

    pub fn as_audio(&self) -> &ffmpeg_next::frame::Audio {
        &self.frame
    }
}

impl From<ffmpeg_next::frame::Audio> for RawAudioFrame {
    fn from(frame: ffmpeg_next::frame::Audio) -> Self {
        Self { frame }
    }
}
