use std::path::Path;

use crate::{
    audio_mixer::{BoxMixer, MixFilterGraph},
    codec::BoxEncoder,
    config::MergeOptions,
    encoder::Encoder,
    input::{AvInput, MediaSource},
    output::{AvOutput, MediaSink},
    resampler::{BoxConverter, SwrConverter},
    stream::CodecParameters,
};

/// The encoder and container a merge job writes into.
pub struct OpenedOutput {
    pub encoder: BoxEncoder,
    /// Format the encoder expects; the mix graph produces exactly this.
    pub parameters: CodecParameters,
    /// Samples per frame the encoder requires, if fixed.
    pub frame_size: Option<u32>,
    pub sink: Box<dyn MediaSink>,
}

/// Factory for everything a merge job talks to outside of its own loop.
pub trait MediaToolkit: Send + Sync {
    fn open_source(&self, url: &str, input_format: Option<&str>) -> anyhow::Result<Box<dyn MediaSource>>;

    fn open_output(&self, options: &MergeOptions, path: &Path) -> anyhow::Result<OpenedOutput>;

    fn open_converter(&self, input: &CodecParameters, output: &CodecParameters) -> anyhow::Result<BoxConverter>;

    fn create_mixer(&self, output: CodecParameters, frame_size: Option<u32>) -> anyhow::Result<BoxMixer>;
}

/// FFmpeg-backed toolkit.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegToolkit;

impl MediaToolkit for FfmpegToolkit {
    fn open_source(&self, url: &str, input_format: Option<&str>) -> anyhow::Result<Box<dyn MediaSource>> {
        crate::init()?;
        let input = AvInput::new(url, input_format, None)?;
        Ok(Box::new(input))
    }

    fn open_output(&self, options: &MergeOptions, path: &Path) -> anyhow::Result<OpenedOutput> {
        let mut output = AvOutput::new(path, &options.format)?;
        let encoder = Encoder::new(&options.encoder_settings(output.requires_global_header()))?;
        output.add_stream(&encoder)?;
        Ok(OpenedOutput {
            parameters: encoder.parameters(),
            frame_size: encoder.frame_size(),
            encoder: Box::new(encoder),
            sink: Box::new(output),
        })
    }

    fn open_converter(&self, input: &CodecParameters, output: &CodecParameters) -> anyhow::Result<BoxConverter> {
        Ok(Box::new(SwrConverter::new(input, output)?))
    }

    fn create_mixer(&self, output: CodecParameters, frame_size: Option<u32>) -> anyhow::Result<BoxMixer> {
        Ok(Box::new(MixFilterGraph::new(output, frame_size)))
    }
}
