//! Channel layouts the output may carry.
//!
//! Players do not render every layout FFmpeg can describe, so any layout outside
//! [`SUPPORTED`] is replaced by [`DEFAULT_LAYOUT`] before a resampler is built.

use ffmpeg_next::ChannelLayout;

pub const DEFAULT_LAYOUT: ChannelLayout = ChannelLayout::STEREO;

/// Whitelisted layouts with their FFmpeg names.
pub const SUPPORTED: &[(ChannelLayout, &str)] = &[
    (ChannelLayout::MONO, "mono"),
    (ChannelLayout::STEREO, "stereo"),
    (ChannelLayout::_2POINT1, "2.1"),
    (ChannelLayout::_2_1, "3.0(back)"),
    (ChannelLayout::SURROUND, "3.0"),
    (ChannelLayout::_3POINT1, "3.1"),
    (ChannelLayout::_2_2, "quad(side)"),
    (ChannelLayout::QUAD, "quad"),
    (ChannelLayout::_5POINT0, "5.0(side)"),
    (ChannelLayout::_5POINT1, "5.1(side)"),
    (ChannelLayout::_5POINT0_BACK, "5.0"),
    (ChannelLayout::_5POINT1_BACK, "5.1"),
    (ChannelLayout::_6POINT0, "6.0"),
    (ChannelLayout::_6POINT0_FRONT, "6.0(front)"),
    (ChannelLayout::_6POINT1, "6.1"),
    (ChannelLayout::_6POINT1_BACK, "6.1(back)"),
    (ChannelLayout::_6POINT1_FRONT, "6.1(front)"),
    (ChannelLayout::_7POINT0, "7.0"),
    (ChannelLayout::_7POINT0_FRONT, "7.0(front)"),
    (ChannelLayout::_7POINT1, "7.1"),
    (ChannelLayout::_7POINT1_WIDE, "7.1(wide-side)"),
    (ChannelLayout::_7POINT1_WIDE_BACK, "7.1(wide)"),
];

pub fn is_supported(layout: ChannelLayout) -> bool {
    SUPPORTED.iter().any(|(l, _)| *l == layout)
}

/// Returns `layout` when whitelisted, the default stereo layout otherwise.
pub fn validate_channel_layout(layout: ChannelLayout) -> ChannelLayout {
    if is_supported(layout) {
        layout
    } else {
        log::debug!(
            "channel layout 0x{:x} not supported, using stereo",
            layout.bits()
        );
        DEFAULT_LAYOUT
    }
}

/// FFmpeg name of a whitelisted layout, usable in filter arguments.
pub fn layout_name(layout: ChannelLayout) -> Option<&'static str> {
    SUPPORTED
        .iter()
        .find(|(l, _)| *l == layout)
        .map(|(_, name)| *name)
}

/// Parses a layout name, a `0x` hex mask or a decimal mask.
pub fn parse_channel_layout(value: &str) -> anyhow::Result<ChannelLayout> {
    let value = value.trim();
    if let Some((layout, _)) = SUPPORTED
        .iter()
        .find(|(_, name)| name.eq_ignore_ascii_case(value))
    {
        return Ok(*layout);
    }
    let bits = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    }
    .map_err(|_| anyhow::anyhow!("unknown channel layout: {}", value))?;
    let layout = ChannelLayout::from_bits_truncate(bits);
    if layout.is_empty() {
        anyhow::bail!("empty channel layout: {}", value);
    }
    Ok(layout)
}
