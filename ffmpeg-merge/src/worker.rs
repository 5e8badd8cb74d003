use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::{
    audio_mixer::BoxMixer,
    codec::{BoxDecoder, BoxEncoder, CodecEngine, Drain},
    config::MergeOptions,
    error::{ErrorKind, MergeError, MergeResultExt},
    frame::RawAudioFrame,
    input::MediaSource,
    merger::{MergeEvent, MergeState, StateCell},
    output::MediaSink,
    packet::RawPacket,
    resampler::{Resampler, Resamplers},
    stream::{AudioStream, StreamIndex},
    toolkit::{MediaToolkit, OpenedOutput},
};

/// Percentage of the source consumed, reported only when it grows.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    duration: Option<Duration>,
    start: Duration,
    position: Duration,
    last: Option<u8>,
}

impl Progress {
    /// `start` is the source position that counts as 0%.
    pub(crate) fn new(duration: Option<Duration>, start: Duration) -> Self {
        Self {
            duration: duration.filter(|d| !d.is_zero()),
            start,
            position: Duration::ZERO,
            last: None,
        }
    }

    /// Records a packet position; returns the new percentage when it increased.
    pub(crate) fn observe(&mut self, position: Option<Duration>) -> Option<u8> {
        let duration = self.duration?;
        let position = position?.saturating_sub(self.start);
        if position > self.position {
            self.position = position;
        }
        let percent = (self.position.as_secs_f64() / duration.as_secs_f64() * 100.0).clamp(0.0, 100.0) as u8;
        self.report(percent)
    }

    pub(crate) fn complete(&mut self) -> Option<u8> {
        self.duration?;
        self.report(100)
    }

    fn report(&mut self, percent: u8) -> Option<u8> {
        if self.last.is_some_and(|last| percent <= last) {
            return None;
        }
        self.last = Some(percent);
        Some(percent)
    }
}

/// Everything a job owns once Starting succeeded.
struct Pipeline {
    source: Box<dyn MediaSource>,
    decoders: BTreeMap<StreamIndex, BoxDecoder>,
    resamplers: Resamplers,
    mixer: BoxMixer,
    encoder: BoxEncoder,
    sink: Box<dyn MediaSink>,
    progress: Progress,
}

/// How the running loop ended.
enum Finish {
    EndOfInput,
    Cancelled,
}

/// One merge job, run to completion on a blocking worker.
pub(crate) struct Job {
    pub url: String,
    pub options: MergeOptions,
    pub output_path: PathBuf,
    pub toolkit: Arc<dyn MediaToolkit>,
    pub cancel: CancellationToken,
    pub state: Arc<StateCell>,
    pub events: UnboundedSender<MergeEvent>,
}

impl Job {
    pub(crate) fn run(self) {
        let mut pipeline = match self.open() {
            Ok(pipeline) => pipeline,
            Err(e) => return self.fail(e),
        };

        self.state.store(MergeState::Running);
        log::info!("merge running: {} -> {}", self.url, self.output_path.display());
        self.emit(MergeEvent::Started);

        match self.run_loop(&mut pipeline) {
            Ok(Finish::EndOfInput) => {
                if let Some(percent) = pipeline.progress.complete() {
                    self.emit(MergeEvent::Processing(percent));
                }
                self.close(pipeline, MergeState::Completed);
            }
            Ok(Finish::Cancelled) => {
                self.state.store(MergeState::Stopping);
                log::info!("merge stopping: {}", self.url);
                self.close(pipeline, MergeState::Stopped);
            }
            Err(e) => {
                Self::teardown(&mut pipeline);
                self.fail(e);
            }
        }
    }

    fn open(&self) -> Result<Pipeline, MergeError> {
        let toolkit = self.toolkit.as_ref();
        let mut source = toolkit
            .open_source(&self.url, self.options.input_format.as_deref())
            .merge_err(ErrorKind::SourceOpen)?;

        let mut decoders = BTreeMap::new();
        let mut streams = Vec::new();
        for stream in source.audio_streams() {
            match source.open_decoder(stream.index) {
                Ok(decoder) => {
                    decoders.insert(stream.index, decoder);
                    streams.push(stream);
                }
                Err(e) => log::warn!("drop stream {}: {:#}", stream.index, e),
            }
        }
        if streams.is_empty() {
            return Err(MergeError::new(
                ErrorKind::SourceOpen,
                anyhow::anyhow!("no decodable audio stream in {}", self.url),
            ));
        }

        let output = toolkit
            .open_output(&self.options, &self.output_path)
            .merge_err(ErrorKind::SinkOpen)?;

        let (resamplers, mixer) = match Self::build_graph(toolkit, &streams, &output) {
            Ok(graph) => graph,
            Err(e) => {
                Self::discard(output.sink);
                return Err(e);
            }
        };

        log::info!(
            "merging {} audio streams of {} into {}",
            resamplers.len(),
            self.url,
            self.output_path.display()
        );

        Ok(Pipeline {
            progress: Progress::new(source.duration(), source.start_time()),
            source,
            decoders,
            resamplers,
            mixer,
            encoder: output.encoder,
            sink: output.sink,
        })
    }

    /// One resampler per stream feeding one mix graph input each.
    fn build_graph(
        toolkit: &dyn MediaToolkit,
        streams: &[AudioStream],
        output: &OpenedOutput,
    ) -> Result<(Resamplers, BoxMixer), MergeError> {
        let mut resamplers = Resamplers::new();
        let mut pads = BTreeMap::new();
        for stream in streams {
            let resampler = Resampler::new(stream.parameters, output.parameters, |input, target| {
                toolkit.open_converter(input, target)
            })
            .merge_err(ErrorKind::GraphBuild)?;
            pads.insert(stream.index, resampler.output_parameters());
            resamplers
                .add_resampler(resampler, stream.index)
                .map_err(|e| MergeError::new(ErrorKind::GraphBuild, e))?;
        }

        let mut mixer = toolkit
            .create_mixer(output.parameters, output.frame_size)
            .merge_err(ErrorKind::GraphBuild)?;
        mixer.initialize(pads).merge_err(ErrorKind::GraphBuild)?;
        Ok((resamplers, mixer))
    }

    /// Closes a sink that never got a packet and removes what it wrote.
    fn discard(sink: Box<dyn MediaSink>) {
        let path = sink.path().to_path_buf();
        drop(sink);
        match std::fs::remove_file(&path) {
            Ok(()) => log::debug!("removed unused output {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("cannot remove {}: {}", path.display(), e),
        }
    }

    fn run_loop(&self, pipeline: &mut Pipeline) -> Result<Finish, MergeError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(Finish::Cancelled);
            }
            let packet = match pipeline.source.read_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => return Ok(Finish::EndOfInput),
                Err(e) => {
                    log::warn!("read error treated as end of input: {:#}", e);
                    return Ok(Finish::EndOfInput);
                }
            };
            if let Some(percent) = self.process_packet(pipeline, packet)? {
                self.emit(MergeEvent::Processing(percent));
            }
        }
    }

    fn process_packet(&self, pipeline: &mut Pipeline, packet: RawPacket) -> Result<Option<u8>, MergeError> {
        let index = packet.index();
        let Some(decoder) = pipeline.decoders.get_mut(&index) else {
            return Ok(None);
        };
        let position = packet.position();
        match decoder.process(Some(packet)) {
            Ok(frames) => {
                for frame in frames {
                    Self::mix_frame(pipeline, index, frame);
                }
            }
            Err(e) => log::debug!("skip packet of stream {}: {:#}", index, e),
        }
        Self::pump(pipeline)?;
        Ok(pipeline.progress.observe(position))
    }

    /// Resamples one decoded frame and feeds the result to the mix graph.
    fn mix_frame(pipeline: &mut Pipeline, index: StreamIndex, frame: RawAudioFrame) {
        let Some(resampler) = pipeline.resamplers.get_resampler(index) else {
            return;
        };
        let mut resampled = Vec::new();
        match resampler.resample(&frame) {
            Ok((first, _)) => {
                resampled.extend(first);
                while let Some(next) = resampler.resampled_frame() {
                    resampled.push(next);
                }
            }
            Err(e) => {
                log::debug!("skip frame of stream {}: {:#}", index, e);
                return;
            }
        }
        for frame in resampled {
            if let Err(e) = pipeline.mixer.filter_frame(frame, index) {
                log::debug!("mix input {} rejected frame: {:#}", index, e);
            }
        }
    }

    /// Moves every mixed frame that is ready through the encoder into the sink.
    fn pump(pipeline: &mut Pipeline) -> Result<(), MergeError> {
        loop {
            match pipeline.mixer.get_filtered_frame() {
                Drain::Produced(frame) => Self::encode(pipeline, Some(frame))?,
                Drain::WouldBlock | Drain::EndOfStream => return Ok(()),
                Drain::Fatal(e) => {
                    log::warn!("mix output error: {:#}", e);
                    return Ok(());
                }
            }
        }
    }

    fn encode(pipeline: &mut Pipeline, frame: Option<RawAudioFrame>) -> Result<(), MergeError> {
        let packets = match pipeline.encoder.process(frame) {
            Ok(packets) => packets,
            Err(e) => {
                log::debug!("skip mixed frame: {:#}", e);
                return Ok(());
            }
        };
        for packet in packets {
            pipeline.sink.write_packet(packet).merge_err(ErrorKind::SinkWrite)?;
        }
        Ok(())
    }

    /// Drains every stage in order, then finalizes the container.
    fn flush(pipeline: &mut Pipeline) -> Result<(), MergeError> {
        let indices: Vec<StreamIndex> = pipeline.decoders.keys().copied().collect();
        for index in &indices {
            let frames = match pipeline.decoders.get_mut(index).map(|d| d.process(None)) {
                Some(Ok(frames)) => frames,
                Some(Err(e)) => {
                    log::debug!("decoder {} flush: {:#}", index, e);
                    continue;
                }
                None => continue,
            };
            for frame in frames {
                Self::mix_frame(pipeline, *index, frame);
            }
        }

        for (index, resampler) in pipeline.resamplers.iter_mut() {
            let tail = match resampler.flush() {
                Ok(tail) => tail,
                Err(e) => {
                    log::debug!("resampler {} flush: {:#}", index, e);
                    continue;
                }
            };
            for frame in tail {
                if let Err(e) = pipeline.mixer.filter_frame(frame, index) {
                    log::debug!("mix input {} rejected frame: {:#}", index, e);
                }
            }
        }

        if let Err(e) = pipeline.mixer.flush() {
            log::warn!("mix graph flush: {:#}", e);
        }
        Self::pump(pipeline)?;
        Self::encode(pipeline, None)?;
        pipeline.sink.finish().merge_err(ErrorKind::SinkFinalize)
    }

    fn teardown(pipeline: &mut Pipeline) {
        pipeline.mixer.deinitialize();
        pipeline.resamplers.remove_all();
    }

    fn close(&self, mut pipeline: Pipeline, terminal: MergeState) {
        let result = Self::flush(&mut pipeline);
        Self::teardown(&mut pipeline);
        drop(pipeline);
        match result {
            Ok(()) => {
                self.state.store(terminal);
                log::info!("merge {:?}: {}", terminal, self.output_path.display());
                self.emit(MergeEvent::Stopped(self.output_path.clone()));
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&self, error: MergeError) {
        self.state.store(MergeState::Failed);
        log::error!("merge failed: {}: {:#}", self.url, error);
        self.emit(MergeEvent::Error(Arc::new(error)));
    }

    fn emit(&self, event: MergeEvent) {
        if self.events.send(event).is_err() {
            log::debug!("merge event dropped, dispatcher gone");
        }
    }
}
