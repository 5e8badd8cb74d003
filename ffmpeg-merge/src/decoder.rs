use ffmpeg_next::Rational;

use crate::{
    codec::{CodecEngine, Drain, classify},
    frame::RawAudioFrame,
    packet::RawPacket,
    stream::{AvStream, CodecParameters},
};

/// Audio decoder for one demuxed stream.
pub struct Decoder {
    inner: ffmpeg_next::codec::decoder::Audio,
    decoder_time_base: Rational,
    eof_sent: bool,
}

unsafe impl Send for Decoder {}

impl Decoder {
    pub fn new(stream: &AvStream) -> anyhow::Result<Self> {
        if !stream.is_audio() {
            anyhow::bail!("stream {} is not an audio stream", stream.index());
        }
        let mut decoder_ctx = ffmpeg_next::codec::Context::from_parameters(stream.parameters().clone())?;
        unsafe {
            (*decoder_ctx.as_mut_ptr()).time_base = stream.time_base().into();
        }
        let audio_decoder = decoder_ctx.decoder().audio()?;
        if audio_decoder.rate() == 0 {
            return Err(anyhow::anyhow!("missing codec parameters"));
        }
        let decoder_time_base = audio_decoder.time_base();

        Ok(Self {
            inner: audio_decoder,
            decoder_time_base,
            eof_sent: false,
        })
    }

    pub fn parameters(&self) -> CodecParameters {
        CodecParameters::from_decoder(&self.inner)
    }
}

impl CodecEngine for Decoder {
    type Input = RawPacket;
    type Output = RawAudioFrame;

    fn submit(&mut self, packet: Option<RawPacket>) -> anyhow::Result<()> {
        let Some(mut packet) = packet else {
            if !self.eof_sent {
                self.eof_sent = true;
                self.inner.send_eof()?;
            }
            return Ok(());
        };
        let time_base = packet.time_base();
        let packet = packet.get_mut();
        if self.decoder_time_base.denominator() > 0 {
            packet.rescale_ts(time_base, self.decoder_time_base);
        }
        match self.inner.send_packet(packet) {
            // the decoder already saw end of stream; nothing left to feed
            Err(ffmpeg_next::Error::Eof) => Ok(()),
            res => res.map_err(Into::into),
        }
    }

    fn receive(&mut self) -> Drain<RawAudioFrame> {
        let mut frame = ffmpeg_next::frame::Audio::empty();
        let result = self.inner.receive_frame(&mut frame);
        classify(result, || RawAudioFrame::from(frame))
    }
}
