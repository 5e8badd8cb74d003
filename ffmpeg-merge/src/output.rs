use std::path::{Path, PathBuf};

use ffmpeg_next::Rational;

use crate::{encoder::Encoder, packet::RawPacket};

/// Container writer for the single mixed output stream.
pub trait MediaSink: Send {
    fn write_packet(&mut self, packet: RawPacket) -> anyhow::Result<()>;

    /// Writes the trailer; the file is playable afterwards even when no packet was written.
    fn finish(&mut self) -> anyhow::Result<()>;

    fn path(&self) -> &Path;
}

pub struct AvOutput {
    inner: ffmpeg_next::format::context::Output,
    path: PathBuf,
    stream_time_base: Rational,
    have_written_header: bool,
    have_written_trailer: bool,
}

unsafe impl Send for AvOutput {}

impl AvOutput {
    pub fn new(path: &Path, format: &str) -> anyhow::Result<Self> {
        let output = ffmpeg_next::format::output_as(&path, format)
            .map_err(|e| anyhow::anyhow!("open output {:?} as {}: {}", path, format, e))?;
        Ok(Self {
            inner: output,
            path: path.to_path_buf(),
            stream_time_base: Rational::new(0, 1),
            have_written_header: false,
            have_written_trailer: false,
        })
    }

    /// Whether encoders feeding this container must put extradata in the global header.
    pub fn requires_global_header(&self) -> bool {
        self.inner
            .format()
            .flags()
            .contains(ffmpeg_next::format::flag::Flags::GLOBAL_HEADER)
    }

    /// Adds the output stream described by `encoder` and writes the container header.
    pub fn add_stream(&mut self, encoder: &Encoder) -> anyhow::Result<()> {
        if self.have_written_header {
            anyhow::bail!("output header already written");
        }
        let codec = ffmpeg_next::encoder::find(encoder.parameters().codec_id);
        let mut writer_stream = self.inner.add_stream(codec)?;
        writer_stream.set_time_base(encoder.time_base());
        writer_stream.set_parameters(encoder.as_encoder());

        self.inner.write_header()?;
        self.have_written_header = true;
        // the muxer may pick its own time base while writing the header
        self.stream_time_base = self
            .inner
            .stream(0)
            .map(|s| s.time_base())
            .ok_or(anyhow::anyhow!("output stream missing after header"))?;
        Ok(())
    }
}

impl MediaSink for AvOutput {
    fn write_packet(&mut self, mut packet: RawPacket) -> anyhow::Result<()> {
        if !self.have_written_header {
            anyhow::bail!("output stream not added");
        }
        let time_base = packet.time_base();
        let p = packet.get_mut();
        p.set_stream(0);
        p.set_position(-1);
        p.rescale_ts(time_base, self.stream_time_base);
        p.write_interleaved(&mut self.inner)?;
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        if !self.have_written_header {
            anyhow::bail!("output stream not added");
        }
        if !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner.write_trailer()?;
        }
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
