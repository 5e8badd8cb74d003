use std::collections::VecDeque;

use ffmpeg_next::{ChannelLayout, format::Sample, software::resampling};

use crate::{
    channel_layout::validate_channel_layout,
    error::RegistryError,
    frame::RawAudioFrame,
    stream::{CodecParameters, StreamIndex},
};

/// Sample format / rate / layout conversion primitive.
pub trait SampleConverter: Send {
    /// Converts one frame into zero or more frames of the target format.
    fn convert(&mut self, frame: &RawAudioFrame) -> anyhow::Result<Vec<RawAudioFrame>>;

    /// Returns samples still held by the converter at end of stream.
    fn flush(&mut self) -> anyhow::Result<Option<RawAudioFrame>>;
}

pub type BoxConverter = Box<dyn SampleConverter>;

/// Headroom added to every output allocation so one call never leaves samples behind.
const OUTPUT_PADDING: usize = 256;

struct SwrState {
    input: (Sample, ChannelLayout, u32),
    context: resampling::Context,
}

/// libswresample backed converter.
pub struct SwrConverter {
    output: CodecParameters,
    state: Option<SwrState>,
}

unsafe impl Send for SwrConverter {}

impl SwrConverter {
    pub fn new(input: &CodecParameters, output: &CodecParameters) -> anyhow::Result<Self> {
        let mut converter = Self {
            output: *output,
            state: None,
        };
        // incomplete parameters are resolved from the first decoded frame
        let known = input.sample_format != Sample::None && input.sample_rate > 0;
        let same = input.sample_format == output.sample_format
            && input.sample_rate == output.sample_rate
            && input.channel_layout == output.channel_layout;
        if known && !same {
            converter.state = Some(converter.build(
                input.sample_format,
                input.channel_layout,
                input.sample_rate,
            )?);
        }
        Ok(converter)
    }

    fn build(&self, format: Sample, layout: ChannelLayout, rate: u32) -> anyhow::Result<SwrState> {
        let context = resampling::Context::get(
            format,
            layout,
            rate,
            self.output.sample_format,
            self.output.channel_layout,
            self.output.sample_rate,
        )
        .map_err(|e| {
            anyhow::anyhow!(
                "resampler {} {}Hz 0x{:x} -> {} {}Hz 0x{:x}: {}",
                format.name(),
                rate,
                layout.bits(),
                self.output.sample_format.name(),
                self.output.sample_rate,
                self.output.channel_layout.bits(),
                e
            )
        })?;
        Ok(SwrState {
            input: (format, layout, rate),
            context,
        })
    }
}

fn output_frame(output: &CodecParameters, samples: usize) -> ffmpeg_next::frame::Audio {
    let mut frame = ffmpeg_next::frame::Audio::new(output.sample_format, samples, output.channel_layout);
    frame.set_rate(output.sample_rate);
    frame
}

fn delayed_samples(state: &SwrState) -> usize {
    state
        .context
        .delay()
        .map(|d| d.output.max(0) as usize)
        .unwrap_or(0)
}

/// Pulls whatever `state` still buffers.
fn drain(output: &CodecParameters, state: &mut SwrState) -> anyhow::Result<Option<RawAudioFrame>> {
    let delayed = delayed_samples(state);
    if delayed == 0 {
        return Ok(None);
    }
    let mut frame = output_frame(output, delayed + OUTPUT_PADDING);
    state.context.flush(&mut frame)?;
    if frame.samples() == 0 {
        return Ok(None);
    }
    Ok(Some(frame.into()))
}

impl SampleConverter for SwrConverter {
    fn convert(&mut self, frame: &RawAudioFrame) -> anyhow::Result<Vec<RawAudioFrame>> {
        if self.state.is_none() && frame.matches(&self.output) {
            return Ok(vec![frame.clone()]);
        }

        let mut input = frame.clone();
        if input.channel_layout().is_empty() {
            let layout = ChannelLayout::default(input.channels() as i32);
            input.get_mut().set_channel_layout(layout);
        }
        let key = (input.format(), input.channel_layout(), input.rate());
        let mut converted = Vec::new();
        let rebuild = match &self.state {
            Some(state) => state.input != key,
            None => true,
        };
        if rebuild {
            if let Some(mut previous) = self.state.take() {
                log::info!(
                    "input format changed to {} {}Hz 0x{:x}, rebuilding resampler",
                    key.0.name(),
                    key.2,
                    key.1.bits()
                );
                converted.extend(drain(&self.output, &mut previous)?);
            }
            self.state = Some(self.build(key.0, key.1, key.2)?);
        }

        let out_rate = self.output.sample_rate as usize;
        let in_rate = (key.2 as usize).max(1);
        let Some(state) = self.state.as_mut() else {
            return Ok(converted);
        };
        let capacity = input.samples() * out_rate / in_rate + delayed_samples(state) + OUTPUT_PADDING;

        let mut output = output_frame(&self.output, capacity);
        state.context.run(input.as_audio(), &mut output)?;
        if output.samples() > 0 {
            converted.push(output.into());
        }
        Ok(converted)
    }

    fn flush(&mut self) -> anyhow::Result<Option<RawAudioFrame>> {
        match self.state.as_mut() {
            Some(state) => drain(&self.output, state),
            None => Ok(None),
        }
    }
}

/// Converts one stream's frames to the shared mix format.
pub struct Resampler {
    id: String,
    output: CodecParameters,
    converter: BoxConverter,
    pending: VecDeque<RawAudioFrame>,
    next_pts: i64,
}

impl Resampler {
    /// Coerces the output layout onto the whitelist, then builds the converter for it.
    pub fn new<F>(input: CodecParameters, output: CodecParameters, make_converter: F) -> anyhow::Result<Self>
    where
        F: FnOnce(&CodecParameters, &CodecParameters) -> anyhow::Result<BoxConverter>,
    {
        let output = CodecParameters {
            channel_layout: validate_channel_layout(output.channel_layout),
            ..output
        };
        let converter = make_converter(&input, &output)?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            output,
            converter,
            pending: VecDeque::new(),
            next_pts: 0,
        })
    }

    /// Opaque tag for log correlation.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn output_parameters(&self) -> CodecParameters {
        self.output
    }

    /// Converts `frame` and returns the first converted frame plus whether nothing
    /// else is pending. When not done, drain with [`Resampler::resampled_frame`].
    pub fn resample(&mut self, frame: &RawAudioFrame) -> anyhow::Result<(Option<RawAudioFrame>, bool)> {
        for converted in self.converter.convert(frame)? {
            self.enqueue(converted);
        }
        let first = self.pending.pop_front();
        Ok((first, self.pending.is_empty()))
    }

    pub fn is_resampled_frame(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn resampled_frame(&mut self) -> Option<RawAudioFrame> {
        self.pending.pop_front()
    }

    /// Drains the converter at end of stream, returning every remaining frame.
    pub fn flush(&mut self) -> anyhow::Result<Vec<RawAudioFrame>> {
        if let Some(tail) = self.converter.flush()? {
            self.enqueue(tail);
        }
        Ok(self.pending.drain(..).collect())
    }

    fn enqueue(&mut self, mut frame: RawAudioFrame) {
        if frame.samples() == 0 {
            return;
        }
        frame.set_pts(Some(self.next_pts));
        self.next_pts += frame.samples() as i64;
        self.pending.push_back(frame);
    }
}

/// Resamplers keyed by stream index; at most one per index.
#[derive(Default)]
pub struct Resamplers {
    slots: Vec<Option<Resampler>>,
}

impl Resamplers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resampler(&mut self, resampler: Resampler, index: StreamIndex) -> Result<(), RegistryError> {
        let slot = index.get();
        if self.slots.len() <= slot {
            self.slots.resize_with(slot + 1, || None);
        }
        if self.slots[slot].is_some() {
            return Err(RegistryError::AlreadyRegistered(index));
        }
        log::debug!("resampler {} registered for stream {}", resampler.id(), index);
        self.slots[slot] = Some(resampler);
        Ok(())
    }

    pub fn get_resampler(&mut self, index: StreamIndex) -> Option<&mut Resampler> {
        self.slots.get_mut(index.get()).and_then(Option::as_mut)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (StreamIndex, &mut Resampler)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|r| (StreamIndex::new(i), r)))
    }

    pub fn remove_all(&mut self) {
        self.slots.clear();
    }
}
