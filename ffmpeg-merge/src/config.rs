use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ffmpeg_next::{ChannelLayout, format::Sample};

use crate::{
    channel_layout::{DEFAULT_LAYOUT, parse_channel_layout, validate_channel_layout},
    encoder::Settings,
    error::{ErrorKind, MergeError},
};

pub const DEFAULT_BIT_RATE: usize = 96_000;
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_FORMAT: &str = "mp4";
pub const DEFAULT_CODEC: &str = "aac";

/// Output settings of a merge job.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOptions {
    pub bit_rate: usize,
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    /// Container short name, also used as the default output extension.
    pub format: String,
    /// Encoder name.
    pub codec: String,
    /// `None` picks a fresh file in the temp directory.
    pub output_path: Option<PathBuf>,
    /// Forces the demuxer, e.g. `lavfi` for filter-generated sources.
    pub input_format: Option<String>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            bit_rate: DEFAULT_BIT_RATE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channel_layout: DEFAULT_LAYOUT,
            format: DEFAULT_FORMAT.to_string(),
            codec: DEFAULT_CODEC.to_string(),
            output_path: None,
            input_format: None,
        }
    }
}

fn invalid(key: &str, value: &str, reason: impl std::fmt::Display) -> MergeError {
    MergeError::new(
        ErrorKind::Configuration,
        anyhow::anyhow!("option {}={:?}: {}", key, value, reason),
    )
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T, MergeError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let parsed: T = value.trim().parse().map_err(|e| invalid(key, value, e))?;
    if parsed <= T::default() {
        return Err(invalid(key, value, "must be positive"));
    }
    Ok(parsed)
}

fn non_empty(key: &str, value: &str) -> Result<String, MergeError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(invalid(key, value, "must not be empty"));
    }
    Ok(value.to_string())
}

impl MergeOptions {
    /// Applies a string option map on top of the defaults. Unknown keys are ignored.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, MergeError> {
        let mut options = Self::default();
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        for key in keys {
            let value = &map[key];
            match key.as_str() {
                "bit_rate" => options.bit_rate = parse_positive(key, value)?,
                "sample_rate" => options.sample_rate = parse_positive(key, value)?,
                "channel_layout" => {
                    let layout = parse_channel_layout(value).map_err(|e| invalid(key, value, e))?;
                    options.channel_layout = validate_channel_layout(layout);
                }
                "format" => options.format = non_empty(key, value)?,
                "codec" => options.codec = non_empty(key, value)?,
                "output_path" => options.output_path = Some(PathBuf::from(non_empty(key, value)?)),
                "input_format" => options.input_format = Some(non_empty(key, value)?),
                _ => log::warn!("ignoring unknown option {}={}", key, value),
            }
        }
        Ok(options)
    }

    /// Output layout after the whitelist is applied.
    pub fn target_layout(&self) -> ChannelLayout {
        validate_channel_layout(self.channel_layout)
    }

    /// Where the merged file is written for the source at `url`.
    pub fn resolve_output_path(&self, url: &str) -> PathBuf {
        if let Some(path) = &self.output_path {
            return path.clone();
        }
        let stem = Path::new(url)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_.".contains(c)))
            .unwrap_or("tracks");
        std::env::temp_dir().join(format!(
            "{}-merged-{}.{}",
            stem,
            uuid::Uuid::new_v4(),
            self.format
        ))
    }

    /// Encoder settings; `global_header` comes from the output container.
    pub fn encoder_settings(&self, global_header: bool) -> Settings {
        Settings {
            codec: self.codec.clone(),
            sample_rate: self.sample_rate,
            channel_layout: self.target_layout(),
            sample_format: Sample::F32(ffmpeg_next::format::sample::Type::Planar),
            bit_rate: self.bit_rate,
            global_header,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let options = MergeOptions::default();
        assert_eq!(options.bit_rate, 96000);
        assert_eq!(options.sample_rate, 48000);
        assert_eq!(options.channel_layout, ChannelLayout::STEREO);
        assert_eq!(options.format, "mp4");
        assert_eq!(options.codec, "aac");
        assert!(options.output_path.is_none());
        assert_eq!(MergeOptions::from_map(&HashMap::new()).unwrap(), options);
    }

    #[test]
    fn test_from_map_overrides_and_ignores_unknown() {
        let options = MergeOptions::from_map(&map(&[
            ("bit_rate", "128000"),
            ("sample_rate", "44100"),
            ("channel_layout", "mono"),
            ("format", "adts"),
            ("output_path", "/tmp/out.aac"),
            ("loudness", "loud"),
        ]))
        .unwrap();
        assert_eq!(options.bit_rate, 128000);
        assert_eq!(options.sample_rate, 44100);
        assert_eq!(options.channel_layout, ChannelLayout::MONO);
        assert_eq!(options.format, "adts");
        assert_eq!(options.output_path, Some(PathBuf::from("/tmp/out.aac")));
    }

    #[test]
    fn test_exotic_layout_falls_back_to_stereo() {
        let options = MergeOptions::from_map(&map(&[("channel_layout", "0x7ff")])).unwrap();
        assert_eq!(options.channel_layout, ChannelLayout::STEREO);

        let options = MergeOptions {
            channel_layout: ChannelLayout::HEXADECAGONAL,
            ..Default::default()
        };
        assert_eq!(options.target_layout(), ChannelLayout::STEREO);
        assert_eq!(
            options.encoder_settings(true).channel_layout,
            ChannelLayout::STEREO
        );
    }

    #[test]
    fn test_bad_values_are_configuration_errors() {
        for (key, value) in [
            ("bit_rate", "fast"),
            ("sample_rate", "0"),
            ("channel_layout", "mystery"),
            ("format", " "),
        ] {
            let err = MergeOptions::from_map(&map(&[(key, value)])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "{}={}", key, value);
        }
    }

    #[test]
    fn test_default_output_path_is_unique_in_temp_dir() {
        let options = MergeOptions::default();
        let a = options.resolve_output_path("/media/show.mkv");
        let b = options.resolve_output_path("/media/show.mkv");
        assert_ne!(a, b);
        assert!(a.starts_with(std::env::temp_dir()));
        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("show-merged-"));
        assert!(name.ends_with(".mp4"));

        let generated = options.resolve_output_path("sine=frequency=440[out0]");
        assert!(
            generated
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("tracks-merged-")
        );
    }

    #[test]
    fn test_explicit_output_path_wins() {
        let options = MergeOptions {
            output_path: Some(PathBuf::from("/data/out.m4a")),
            ..Default::default()
        };
        assert_eq!(
            options.resolve_output_path("in.mkv"),
            PathBuf::from("/data/out.m4a")
        );
    }
}
