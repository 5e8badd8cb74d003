use std::time::Duration;

use ffmpeg_next::Rational;

use crate::stream::StreamIndex;

/// A compressed packet together with the time base its timestamps are expressed in.
#[derive(Clone)]
pub struct RawPacket {
    packet: ffmpeg_next::codec::packet::Packet,
    time_base: Rational,
}

impl RawPacket {
    /// Builds a packet from a byte payload.
    #[cfg(test)]
    pub(crate) fn from_data(data: &[u8], stream_index: StreamIndex, pts: i64, time_base: Rational) -> Self {
        let mut packet = ffmpeg_next::codec::packet::Packet::copy(data);
        packet.set_stream(stream_index.get());
        packet.set_pts(Some(pts));
        packet.set_dts(Some(pts));
        Self { packet, time_base }
    }

    pub fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    pub fn index(&self) -> StreamIndex {
        StreamIndex::new(self.packet.stream())
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Presentation position of the packet, if it carries a timestamp.
    pub fn position(&self) -> Option<Duration> {
        let ts = self.packet.pts().or(self.packet.dts())?;
        let den = self.time_base.denominator();
        if ts < 0 || den <= 0 {
            return None;
        }
        let secs = ts as f64 * self.time_base.numerator() as f64 / den as f64;
        Some(Duration::from_secs_f64(secs))
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::codec::packet::Packet {
        &mut self.packet
    }
}

impl From<(ffmpeg_next::codec::packet::Packet, Rational)> for RawPacket {
    fn from((packet, time_base): (ffmpeg_next::codec::packet::Packet, Rational)) -> Self {
        Self { packet, time_base }
    }
}
