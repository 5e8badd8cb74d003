use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use ffmpeg_merge::{MergeEvent, StreamMerger};
use futures::StreamExt;

/// Mix every audio track of a media file into a single encoded track.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input file path or URL
    #[arg(required = true)]
    input: String,

    /// Output file path; defaults to a fresh file in the temp directory
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Output bit rate in bits per second
    #[arg(long, value_name = "BPS")]
    bit_rate: Option<usize>,

    /// Output sample rate in Hz
    #[arg(long, value_name = "HZ")]
    sample_rate: Option<u32>,

    /// Output channel layout: a name such as stereo or 5.1, or a mask
    #[arg(long, value_name = "LAYOUT")]
    channel_layout: Option<String>,

    /// Output container format
    #[arg(short, long, value_name = "FORMAT")]
    format: Option<String>,

    /// Force the input format, e.g. lavfi
    #[arg(long, value_name = "FORMAT")]
    input_format: Option<String>,

    /// JSON file with a flat string map of options; flags override it
    #[arg(long, value_name = "FILE")]
    options: Option<PathBuf>,

    /// Do not print progress
    #[arg(long)]
    no_progress: bool,
}

impl Cli {
    fn option_map(&self) -> anyhow::Result<HashMap<String, String>> {
        let mut map: HashMap<String, String> = match &self.options {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("read {}: {}", path.display(), e))?;
                serde_json::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("parse {}: {}", path.display(), e))?
            }
            None => HashMap::new(),
        };
        let flags = [
            ("output_path", self.output.as_ref().map(|p| p.display().to_string())),
            ("bit_rate", self.bit_rate.map(|v| v.to_string())),
            ("sample_rate", self.sample_rate.map(|v| v.to_string())),
            ("channel_layout", self.channel_layout.clone()),
            ("format", self.format.clone()),
            ("input_format", self.input_format.clone()),
        ];
        for (key, value) in flags {
            if let Some(value) = value {
                map.insert(key.to_string(), value);
            }
        }
        Ok(map)
    }
}

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_merge", log::LevelFilter::Info)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    ffmpeg_merge::init()?;

    let cli = Cli::parse();
    let merger = StreamMerger::with_options(&cli.input, &cli.option_map()?)?;
    let mut events = Box::pin(merger.events());
    merger.start()?;

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(MergeEvent::Started) => log::info!("merging {}", cli.input),
                Some(MergeEvent::Processing(progress)) => {
                    if !cli.no_progress {
                        eprint!("\r{:>3}%", progress);
                    }
                }
                Some(MergeEvent::Stopped(path)) => {
                    if !cli.no_progress {
                        eprintln!();
                    }
                    println!("{}", path.display());
                    return Ok(());
                }
                Some(MergeEvent::Error(e)) => anyhow::bail!("{}", e),
                None => anyhow::bail!("merge events closed"),
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted, finishing output");
                merger.stop();
            },
        }
    }
}
