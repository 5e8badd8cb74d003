use ffmpeg_next::{Rational, codec, format::Sample};

use crate::{
    codec::{CodecEngine, Drain, classify},
    frame::RawAudioFrame,
    packet::RawPacket,
    stream::CodecParameters,
};

#[derive(Debug, Clone)]
pub struct Settings {
    pub codec: String,
    pub sample_rate: u32,
    pub channel_layout: ffmpeg_next::ChannelLayout,
    pub sample_format: Sample,
    pub bit_rate: usize,
    /// Set when the container wants codec extradata in its header (mp4, mov, ...).
    pub global_header: bool,
}

/// Encoder for the single mixed-down output stream.
pub struct Encoder {
    inner: codec::encoder::audio::Encoder,
    encoder_time_base: Rational,
    parameters: CodecParameters,
    variable_frame_size: bool,
    next_pts: i64,
    eof_sent: bool,
}

unsafe impl Send for Encoder {}

impl Encoder {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let codec = ffmpeg_next::encoder::find_by_name(&settings.codec)
            .ok_or(anyhow::anyhow!("codec not found: {}", settings.codec))?;
        let sample_format = Self::select_format(&codec, settings.sample_format)?;

        let mut encoder = codec::Context::new_with_codec(codec).encoder().audio()?;
        encoder.set_rate(settings.sample_rate as i32);
        encoder.set_channel_layout(settings.channel_layout);
        encoder.set_format(sample_format);
        encoder.set_bit_rate(settings.bit_rate);
        encoder.set_time_base((1, settings.sample_rate as i32));
        if settings.global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder.open_as(codec)?;
        log::info!(
            "encoder opened: {} {}Hz {} ch, {} bps, frame_size {}",
            settings.codec,
            settings.sample_rate,
            settings.channel_layout.channels(),
            settings.bit_rate,
            encoder.frame_size()
        );

        let variable_frame_size = codec
            .capabilities()
            .contains(codec::capabilities::Capabilities::VARIABLE_FRAME_SIZE);

        Ok(Self {
            parameters: CodecParameters {
                codec_id: codec.id(),
                sample_rate: settings.sample_rate,
                channel_layout: settings.channel_layout,
                sample_format,
                bit_rate: settings.bit_rate,
            },
            inner: encoder,
            encoder_time_base: Rational::new(1, settings.sample_rate as i32),
            variable_frame_size,
            next_pts: 0,
            eof_sent: false,
        })
    }

    fn select_format(codec: &codec::Codec, wanted: Sample) -> anyhow::Result<Sample> {
        let audio = codec.audio()?;
        let Some(formats) = audio.formats() else {
            return Ok(wanted);
        };
        let formats: Vec<Sample> = formats.collect();
        if formats.contains(&wanted) {
            return Ok(wanted);
        }
        let fallback = formats
            .first()
            .copied()
            .ok_or(anyhow::anyhow!("encoder {} supports no sample format", codec.name()))?;
        log::warn!(
            "encoder {} does not support {}, using {}",
            codec.name(),
            wanted.name(),
            fallback.name()
        );
        Ok(fallback)
    }

    /// The format frames must have when submitted.
    pub fn parameters(&self) -> CodecParameters {
        self.parameters
    }

    /// Samples per frame the encoder requires, `None` when any size is accepted.
    pub fn frame_size(&self) -> Option<u32> {
        let size = self.inner.frame_size();
        if self.variable_frame_size || size == 0 {
            None
        } else {
            Some(size)
        }
    }

    pub fn time_base(&self) -> Rational {
        self.encoder_time_base
    }

    pub fn as_encoder(&self) -> &codec::encoder::audio::Encoder {
        &self.inner
    }
}

impl CodecEngine for Encoder {
    type Input = RawAudioFrame;
    type Output = RawPacket;

    fn submit(&mut self, frame: Option<RawAudioFrame>) -> anyhow::Result<()> {
        let Some(mut frame) = frame else {
            if !self.eof_sent {
                self.eof_sent = true;
                self.inner.send_eof()?;
            }
            return Ok(());
        };
        frame.set_pts(Some(self.next_pts));
        self.next_pts += frame.samples() as i64;
        self.inner.send_frame(frame.as_audio())?;
        Ok(())
    }

    fn receive(&mut self) -> Drain<RawPacket> {
        let mut packet = codec::packet::Packet::empty();
        let result = self.inner.receive_packet(&mut packet);
        let time_base = self.encoder_time_base;
        classify(result, || RawPacket::from((packet, time_base)))
    }
}
