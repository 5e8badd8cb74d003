use std::fmt;

use ffmpeg_next::{ChannelLayout, Rational, codec, format::Sample, format::stream};

/// Key of one input audio stream, stable for the lifetime of a merge job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamIndex(usize);

impl StreamIndex {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl From<usize> for StreamIndex {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for StreamIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable description of one stream's audio format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParameters {
    pub codec_id: codec::Id,
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    pub sample_format: Sample,
    pub bit_rate: usize,
}

impl CodecParameters {
    pub fn channels(&self) -> u32 {
        self.channel_layout.channels() as u32
    }

    pub(crate) fn from_decoder(decoder: &codec::decoder::Audio) -> Self {
        let layout = decoder.channel_layout();
        let channel_layout = if layout.is_empty() {
            ChannelLayout::default(decoder.channels() as i32)
        } else {
            layout
        };
        Self {
            codec_id: decoder.id(),
            sample_rate: decoder.rate(),
            channel_layout,
            sample_format: decoder.format(),
            bit_rate: decoder.bit_rate(),
        }
    }
}

/// An audio stream as enumerated by a media source.
#[derive(Debug, Clone)]
pub struct AudioStream {
    pub index: StreamIndex,
    pub parameters: CodecParameters,
    pub time_base: Rational,
}

/// FFmpeg-side view of a demuxed stream; carries what a decoder needs.
pub struct AvStream {
    index: usize,
    parameters: codec::Parameters,
    time_base: Rational,
}

unsafe impl Send for AvStream {}
unsafe impl Sync for AvStream {}

impl AvStream {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn parameters(&self) -> &codec::Parameters {
        &self.parameters
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn is_audio(&self) -> bool {
        self.parameters.medium() == ffmpeg_next::media::Type::Audio
    }
}

impl From<stream::Stream<'_>> for AvStream {
    fn from(stream: stream::Stream<'_>) -> Self {
        Self {
            index: stream.index(),
            parameters: stream.parameters(),
            time_base: stream.time_base(),
        }
    }
}

impl Clone for AvStream {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            parameters: self.parameters.clone(),
            time_base: self.time_base,
        }
    }
}
