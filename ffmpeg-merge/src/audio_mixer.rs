use std::collections::BTreeMap;

use ffmpeg_next::{ChannelLayout, filter, frame::Audio};

use crate::{
    channel_layout::layout_name,
    codec::{Drain, classify},
    frame::RawAudioFrame,
    stream::{CodecParameters, StreamIndex},
};

/// N-input to 1-output mixing graph.
pub trait MixGraph: Send {
    /// Builds the graph with one input per entry, keyed by stream index.
    fn initialize(&mut self, inputs: BTreeMap<StreamIndex, CodecParameters>) -> anyhow::Result<()>;

    /// Pushes a frame into the input registered for `index`.
    fn filter_frame(&mut self, frame: RawAudioFrame, index: StreamIndex) -> anyhow::Result<()>;

    /// Pulls one mixed frame.
    fn get_filtered_frame(&mut self) -> Drain<RawAudioFrame>;

    /// Signals end of stream on every input.
    fn flush(&mut self) -> anyhow::Result<()>;

    /// Releases the graph. Safe when never initialized and when called twice.
    fn deinitialize(&mut self);
}

pub type BoxMixer = Box<dyn MixGraph>;

const SINK: &str = "out";
const MIXER: &str = "mixer";
const FORMAT: &str = "format";

struct Built {
    graph: filter::Graph,
    pads: BTreeMap<StreamIndex, String>,
}

/// `abuffer`* -> `amix` -> `aformat` -> `abuffersink` graph.
pub struct MixFilterGraph {
    output: CodecParameters,
    frame_size: Option<u32>,
    built: Option<Built>,
    initialized: bool,
    flushed: bool,
}

unsafe impl Send for MixFilterGraph {}

fn layout_arg(layout: ChannelLayout) -> String {
    match layout_name(layout) {
        Some(name) => name.to_string(),
        None => format!("0x{:x}", layout.bits()),
    }
}

fn find_filter(name: &str) -> anyhow::Result<filter::Filter> {
    filter::find(name).ok_or(anyhow::anyhow!("filter {} not available", name))
}

fn link(graph: &mut filter::Graph, src: &str, dst: &str, dst_pad: u32) -> anyhow::Result<()> {
    let src_ptr = graph
        .get(src)
        .map(|mut ctx| unsafe { ctx.as_mut_ptr() })
        .ok_or(anyhow::anyhow!("filter {} missing", src))?;
    let dst_ptr = graph
        .get(dst)
        .map(|mut ctx| unsafe { ctx.as_mut_ptr() })
        .ok_or(anyhow::anyhow!("filter {} missing", dst))?;
    let ret = unsafe { ffmpeg_next::ffi::avfilter_link(src_ptr, 0, dst_ptr, dst_pad) };
    if ret < 0 {
        anyhow::bail!(
            "link {} -> {}:{}: {}",
            src,
            dst,
            dst_pad,
            ffmpeg_next::Error::from(ret)
        );
    }
    Ok(())
}

impl MixFilterGraph {
    /// `frame_size` is the sample count every output frame must carry, if fixed.
    pub fn new(output: CodecParameters, frame_size: Option<u32>) -> Self {
        Self {
            output,
            frame_size,
            built: None,
            initialized: false,
            flushed: false,
        }
    }

    fn build(&self, inputs: &BTreeMap<StreamIndex, CodecParameters>) -> anyhow::Result<Built> {
        let mut graph = filter::Graph::new();
        let mut pads = BTreeMap::new();

        for (index, params) in inputs {
            let name = format!("in_{}", index);
            let args = format!(
                "time_base=1/{}:sample_rate={}:sample_fmt={}:channel_layout={}",
                params.sample_rate,
                params.sample_rate,
                params.sample_format.name(),
                layout_arg(params.channel_layout)
            );
            graph.add(&find_filter("abuffer")?, &name, &args)?;
            pads.insert(*index, name);
        }

        let amix_args = format!("inputs={}:duration=longest", inputs.len());
        graph.add(&find_filter("amix")?, MIXER, &amix_args)?;

        let aformat_args = format!(
            "sample_fmts={}:sample_rates={}:channel_layouts={}",
            self.output.sample_format.name(),
            self.output.sample_rate,
            layout_arg(self.output.channel_layout)
        );
        graph.add(&find_filter("aformat")?, FORMAT, &aformat_args)?;
        graph.add(&find_filter("abuffersink")?, SINK, "")?;

        for (pad, name) in pads.values().enumerate() {
            link(&mut graph, name, MIXER, pad as u32)?;
        }
        link(&mut graph, MIXER, FORMAT, 0)?;
        link(&mut graph, FORMAT, SINK, 0)?;

        graph.validate()?;

        if let Some(size) = self.frame_size {
            let mut sink = graph
                .get(SINK)
                .ok_or(anyhow::anyhow!("filter {} missing", SINK))?;
            sink.sink().set_frame_size(size);
        }

        log::debug!("mix graph:\n{}", graph.dump());
        Ok(Built { graph, pads })
    }
}

impl MixGraph for MixFilterGraph {
    fn initialize(&mut self, inputs: BTreeMap<StreamIndex, CodecParameters>) -> anyhow::Result<()> {
        if self.initialized {
            anyhow::bail!("mix graph already initialized");
        }
        if inputs.is_empty() {
            anyhow::bail!("mix graph needs at least one input");
        }
        self.initialized = true;
        let built = self.build(&inputs)?;
        log::info!(
            "mix graph ready: {} inputs -> {} {}Hz {} ch",
            inputs.len(),
            self.output.sample_format.name(),
            self.output.sample_rate,
            self.output.channels()
        );
        self.built = Some(built);
        Ok(())
    }

    fn filter_frame(&mut self, frame: RawAudioFrame, index: StreamIndex) -> anyhow::Result<()> {
        let built = self
            .built
            .as_mut()
            .ok_or(anyhow::anyhow!("mix graph not initialized"))?;
        let name = built
            .pads
            .get(&index)
            .ok_or(anyhow::anyhow!("no mix input for stream {}", index))?;
        let mut ctx = built
            .graph
            .get(name)
            .ok_or(anyhow::anyhow!("filter {} missing", name))?;
        ctx.source().add(frame.as_audio())?;
        Ok(())
    }

    fn get_filtered_frame(&mut self) -> Drain<RawAudioFrame> {
        let Some(built) = self.built.as_mut() else {
            return Drain::WouldBlock;
        };
        let Some(mut ctx) = built.graph.get(SINK) else {
            return Drain::Fatal(anyhow::anyhow!("filter {} missing", SINK));
        };
        let mut frame = Audio::empty();
        let result = ctx.sink().frame(&mut frame);
        classify(result, || RawAudioFrame::from(frame))
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        if self.flushed {
            return Ok(());
        }
        let built = self
            .built
            .as_mut()
            .ok_or(anyhow::anyhow!("mix graph not initialized"))?;
        self.flushed = true;
        let names: Vec<String> = built.pads.values().cloned().collect();
        for name in names {
            let mut ctx = built
                .graph
                .get(&name)
                .ok_or(anyhow::anyhow!("filter {} missing", name))?;
            ctx.source().flush()?;
        }
        Ok(())
    }

    fn deinitialize(&mut self) {
        if self.built.take().is_some() {
            log::debug!("mix graph released");
        }
    }
}

#[cfg(test)]
mod tests {
    use ffmpeg_next::{codec, format::Sample};

    use super::*;

    fn output() -> CodecParameters {
        CodecParameters {
            codec_id: codec::Id::None,
            sample_rate: 48000,
            channel_layout: ChannelLayout::STEREO,
            sample_format: Sample::F32(ffmpeg_next::format::sample::Type::Planar),
            bit_rate: 0,
        }
    }

    fn two_inputs() -> BTreeMap<StreamIndex, CodecParameters> {
        BTreeMap::from([(StreamIndex::new(0), output()), (StreamIndex::new(2), output())])
    }

    fn drain(mixer: &mut MixFilterGraph) -> anyhow::Result<(usize, bool)> {
        let mut samples = 0;
        loop {
            match mixer.get_filtered_frame() {
                Drain::Produced(frame) => {
                    assert!(frame.matches(&output()));
                    samples += frame.samples();
                }
                Drain::WouldBlock => return Ok((samples, false)),
                Drain::EndOfStream => return Ok((samples, true)),
                Drain::Fatal(e) => return Err(e),
            }
        }
    }

    #[test]
    fn test_nothing_to_pull_before_input() -> anyhow::Result<()> {
        ffmpeg_next::init()?;
        let mut mixer = MixFilterGraph::new(output(), Some(1024));
        assert!(matches!(mixer.get_filtered_frame(), Drain::WouldBlock));

        mixer.initialize(two_inputs())?;
        assert!(matches!(mixer.get_filtered_frame(), Drain::WouldBlock));
        Ok(())
    }

    #[test]
    fn test_initialize_only_once() -> anyhow::Result<()> {
        ffmpeg_next::init()?;
        let mut mixer = MixFilterGraph::new(output(), None);
        assert!(mixer.initialize(BTreeMap::new()).is_err());
        let mut mixer = MixFilterGraph::new(output(), None);
        mixer.initialize(two_inputs())?;
        assert!(mixer.initialize(two_inputs()).is_err());
        Ok(())
    }

    #[test]
    fn test_unknown_stream_is_rejected() -> anyhow::Result<()> {
        ffmpeg_next::init()?;
        let mut mixer = MixFilterGraph::new(output(), None);
        let frame = RawAudioFrame::silence(&output(), 1024, Some(0));
        assert!(mixer.filter_frame(frame.clone(), StreamIndex::new(0)).is_err());

        mixer.initialize(two_inputs())?;
        assert!(mixer.filter_frame(frame, StreamIndex::new(1)).is_err());
        Ok(())
    }

    #[test]
    fn test_output_lasts_as_long_as_longest_input() -> anyhow::Result<()> {
        ffmpeg_next::init()?;
        let mut mixer = MixFilterGraph::new(output(), Some(1024));
        mixer.initialize(two_inputs())?;

        let mut total = 0;
        for i in 0..4 {
            let pts = Some(i * 1024);
            mixer.filter_frame(RawAudioFrame::silence(&output(), 1024, pts), StreamIndex::new(0))?;
            if i < 2 {
                mixer.filter_frame(
                    RawAudioFrame::silence(&output(), 1024, pts),
                    StreamIndex::new(2),
                )?;
            }
            total += drain(&mut mixer)?.0;
        }
        mixer.flush()?;
        let (tail, exhausted) = drain(&mut mixer)?;
        total += tail;

        assert!(exhausted);
        assert_eq!(total, 4096);
        Ok(())
    }

    #[test]
    fn test_single_input_passes_through() -> anyhow::Result<()> {
        ffmpeg_next::init()?;
        let mut mixer = MixFilterGraph::new(output(), Some(1024));
        mixer.initialize(BTreeMap::from([(StreamIndex::new(1), output())]))?;
        for i in 0..3 {
            mixer.filter_frame(
                RawAudioFrame::silence(&output(), 1024, Some(i * 1024)),
                StreamIndex::new(1),
            )?;
        }
        mixer.flush()?;
        assert_eq!(drain(&mut mixer)?, (3072, true));
        Ok(())
    }

    #[test]
    fn test_deinitialize_is_idempotent() -> anyhow::Result<()> {
        ffmpeg_next::init()?;
        let mut mixer = MixFilterGraph::new(output(), None);
        mixer.deinitialize();
        mixer.initialize(two_inputs())?;
        mixer.deinitialize();
        mixer.deinitialize();
        assert!(matches!(mixer.get_filtered_frame(), Drain::WouldBlock));
        Ok(())
    }
}
