use std::collections::HashMap;
use std::ffi::CString;
use std::path::Path;
use std::time::Duration;

use ffmpeg_next::Dictionary;

use crate::{
    codec::BoxDecoder,
    decoder::Decoder,
    packet::RawPacket,
    stream::{AudioStream, AvStream, StreamIndex},
};

/// An opened, finite container yielding compressed packets in source order.
pub trait MediaSource: Send {
    /// Every decodable audio stream, ordered by stream index.
    fn audio_streams(&self) -> Vec<AudioStream>;

    /// Estimated total duration, used for progress.
    fn duration(&self) -> Option<Duration>;

    /// Position of the first packet; progress counts from here.
    fn start_time(&self) -> Duration;

    /// Next packet of any stream; `Ok(None)` at end of input.
    fn read_packet(&mut self) -> anyhow::Result<Option<RawPacket>>;

    fn open_decoder(&mut self, index: StreamIndex) -> anyhow::Result<BoxDecoder>;
}

pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    streams: HashMap<usize, AvStream>,
    audio: Vec<AudioStream>,
    /// Decoders opened while probing the streams, handed out by `open_decoder`.
    probed: HashMap<usize, Decoder>,
}

unsafe impl Send for AvInput {}

impl AvInput {
    /// Resolve input format by name (e.g. "lavfi", "wav") via FFmpeg's av_find_input_format.
    fn find_input_format(name: &str) -> anyhow::Result<ffmpeg_next::format::format::Input> {
        let cname = CString::new(name)
            .map_err(|e| anyhow::anyhow!("invalid format name {:?}: {}", name, e))?;
        let ptr = unsafe { ffmpeg_next::ffi::av_find_input_format(cname.as_ptr()) };
        if ptr.is_null() {
            return Err(anyhow::anyhow!("input format not found: {}", name));
        }
        Ok(unsafe { ffmpeg_next::format::format::Input::wrap(ptr as *mut _) })
    }

    pub fn new(url: &str, format: Option<&str>, options: Option<Dictionary>) -> anyhow::Result<Self> {
        use ffmpeg_next::format::format::Format;

        let path = Path::new(url);
        let input = match (format, options) {
            (Some(fmt_name), opts) => {
                let fmt = Self::find_input_format(fmt_name)?;
                let ctx = ffmpeg_next::format::open_with(
                    path,
                    &Format::Input(fmt),
                    opts.unwrap_or_else(Dictionary::new),
                )?;
                ctx.input()
            }
            (None, Some(opts)) => ffmpeg_next::format::input_with_dictionary(path, opts)?,
            (None, None) => ffmpeg_next::format::input(path)?,
        };

        let mut streams = HashMap::new();
        let mut audio = Vec::new();
        let mut probed = HashMap::new();
        for stream in input.streams() {
            let av_stream = AvStream::from(stream);
            if av_stream.is_audio() {
                match Decoder::new(&av_stream) {
                    Ok(decoder) => {
                        let parameters = decoder.parameters();
                        log::info!(
                            "audio stream {}: {:?} {}Hz {} ch {}",
                            av_stream.index(),
                            parameters.codec_id,
                            parameters.sample_rate,
                            parameters.channels(),
                            parameters.sample_format.name()
                        );
                        audio.push(AudioStream {
                            index: StreamIndex::new(av_stream.index()),
                            parameters,
                            time_base: av_stream.time_base(),
                        });
                        probed.insert(av_stream.index(), decoder);
                    }
                    Err(e) => {
                        log::warn!("skip audio stream {}: {:#}", av_stream.index(), e);
                    }
                }
            }
            streams.insert(av_stream.index(), av_stream);
        }
        audio.sort_by_key(|s| s.index);

        Ok(Self {
            inner: input,
            streams,
            audio,
            probed,
        })
    }
}

impl MediaSource for AvInput {
    fn audio_streams(&self) -> Vec<AudioStream> {
        self.audio.clone()
    }

    fn duration(&self) -> Option<Duration> {
        // AV_TIME_BASE = 1_000_000; duration is in 1/AV_TIME_BASE seconds
        let d = self.inner.duration();
        if d == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || d <= 0 {
            None
        } else {
            Some(Duration::from_micros(d as u64))
        }
    }

    fn start_time(&self) -> Duration {
        // AV_TIME_BASE units, like duration
        let start = unsafe { (*self.inner.as_ptr()).start_time };
        if start == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || start <= 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(start as u64)
        }
    }

    fn read_packet(&mut self) -> anyhow::Result<Option<RawPacket>> {
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        match packet.read(&mut self.inner) {
            Ok(()) => {
                let time_base = self
                    .streams
                    .get(&packet.stream())
                    .map(|s| s.time_base())
                    .ok_or(anyhow::anyhow!("packet of unknown stream {}", packet.stream()))?;
                Ok(Some(RawPacket::from((packet, time_base))))
            }
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn open_decoder(&mut self, index: StreamIndex) -> anyhow::Result<BoxDecoder> {
        if let Some(decoder) = self.probed.remove(&index.get()) {
            return Ok(Box::new(decoder));
        }
        let stream = self
            .streams
            .get(&index.get())
            .ok_or(anyhow::anyhow!("stream {} not found", index))?;
        Ok(Box::new(Decoder::new(stream)?))
    }
}
