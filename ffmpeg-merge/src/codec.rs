//! Store-then-drain contract shared by the decoder and encoder adapters.
//!
//! Feeding one unit of input may yield zero or more outputs because codecs buffer
//! internally. Callers `submit` once and then `receive` until the engine reports
//! that nothing more is available.

use crate::{frame::RawAudioFrame, packet::RawPacket};

/// Outcome of one receive step.
#[derive(Debug)]
pub enum Drain<T> {
    Produced(T),
    /// Nothing available yet, more input is required.
    WouldBlock,
    /// The engine is fully flushed.
    EndOfStream,
    Fatal(anyhow::Error),
}

/// Everything one drain pass collected.
#[derive(Debug)]
pub struct Drained<T> {
    pub items: Vec<T>,
    /// True once the engine reported end of stream.
    pub exhausted: bool,
}

/// Classifies an FFmpeg receive result into a [`Drain`].
pub(crate) fn classify<T>(result: Result<(), ffmpeg_next::Error>, value: impl FnOnce() -> T) -> Drain<T> {
    match result {
        Ok(()) => Drain::Produced(value()),
        Err(ffmpeg_next::Error::Eof) => Drain::EndOfStream,
        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
            Drain::WouldBlock
        }
        Err(err) => Drain::Fatal(err.into()),
    }
}

pub trait CodecEngine: Send {
    type Input;
    type Output;

    /// Feeds one unit of input; `None` signals end of stream and starts the flush.
    fn submit(&mut self, input: Option<Self::Input>) -> anyhow::Result<()>;

    fn receive(&mut self) -> Drain<Self::Output>;

    /// Receives until the engine would block or is exhausted.
    ///
    /// A failure after some outputs were received ends the pass but keeps them;
    /// it is only returned when nothing was received.
    fn drain_available(&mut self) -> anyhow::Result<Drained<Self::Output>> {
        let mut items = Vec::new();
        loop {
            match self.receive() {
                Drain::Produced(item) => items.push(item),
                Drain::WouldBlock => {
                    return Ok(Drained {
                        items,
                        exhausted: false,
                    });
                }
                Drain::EndOfStream => {
                    return Ok(Drained {
                        items,
                        exhausted: true,
                    });
                }
                Drain::Fatal(err) if items.is_empty() => return Err(err),
                Drain::Fatal(err) => {
                    log::warn!("receive failed after {} outputs: {:#}", items.len(), err);
                    return Ok(Drained {
                        items,
                        exhausted: false,
                    });
                }
            }
        }
    }

    /// `submit` followed by `drain_available`.
    fn process(&mut self, input: Option<Self::Input>) -> anyhow::Result<Vec<Self::Output>> {
        self.submit(input)?;
        Ok(self.drain_available()?.items)
    }
}

pub type BoxDecoder = Box<dyn CodecEngine<Input = RawPacket, Output = RawAudioFrame>>;
pub type BoxEncoder = Box<dyn CodecEngine<Input = RawAudioFrame, Output = RawPacket>>;
