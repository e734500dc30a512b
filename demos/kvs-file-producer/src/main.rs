//! Streams a rotating set of numbered H.264 frame files (Annex-B or AVCC)
//! to a Kinesis Video Streams stream.
//!
//! Grounded on `samples/common/h264_file_loader.c` and `kvs_video_only_linux`
//! of the reference producer: same `printf`-style filename templating and
//! start/end/rotate loading policy, reimplemented against the coordinator's
//! `open`/`add_frame`/`do_work` loop instead of the sample app's callback
//! registration pattern.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use kvs_producer::config::KvsConfig;
use kvs_producer::coordinator::Coordinator;
use kvs_producer::mkv::TrackType;

#[derive(Parser)]
#[command(about = "File-based H.264 KVS producer")]
struct Args {
    /// Path to a KvsConfig TOML file (region, stream name, credentials).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Filename template with a single `{}` placeholder for the frame
    /// index, e.g. "frames/frame-{}.h264".
    #[arg(long)]
    file_format: String,

    /// First frame index to load.
    #[arg(long, default_value_t = 0)]
    start_idx: i64,

    /// One past the last frame index; 0 means "until a read fails".
    #[arg(long, default_value_t = 0)]
    end_idx: i64,

    /// Loop back to start_idx after reaching end_idx.
    #[arg(long, default_value_t = false)]
    keep_rotate: bool,

    /// Source frame rate, used to space synthetic timestamps.
    #[arg(long, default_value_t = 25)]
    fps: u32,
}

struct FileLoader {
    file_format: String,
    current_idx: i64,
    start_idx: i64,
    end_idx: i64,
    keep_rotate: bool,
    stopped: bool,
}

impl FileLoader {
    fn new(args: &Args) -> Self {
        Self {
            file_format: args.file_format.clone(),
            current_idx: args.start_idx,
            start_idx: args.start_idx,
            end_idx: args.end_idx,
            keep_rotate: args.keep_rotate,
            stopped: false,
        }
    }

    fn filename(&self) -> String {
        self.file_format.replacen("{}", &self.current_idx.to_string(), 1)
    }

    /// Reads the current frame and advances the index, honoring rotate/stop.
    fn load_next(&mut self) -> Result<Option<Vec<u8>>> {
        if self.stopped {
            return Ok(None);
        }
        let path = self.filename();
        let data = match std::fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && self.end_idx == 0 => {
                self.stopped = true;
                return Ok(None);
            }
            Err(e) => return Err(e).with_context(|| format!("reading frame file {path}")),
        };

        self.current_idx += 1;
        if self.end_idx > 0 && self.current_idx >= self.end_idx {
            if self.keep_rotate {
                self.current_idx = self.start_idx;
            } else {
                self.stopped = true;
            }
        }
        Ok(Some(data))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if args.start_idx < 0 {
        bail!("start_idx must be non-negative");
    }

    let config = KvsConfig::load(args.config.as_deref())?;
    if config.stream_name.is_empty() {
        bail!("stream_name must be set via config file or KVS_STREAM_NAME");
    }

    let mut coordinator = Coordinator::new(config);
    coordinator.open().context("opening PutMedia session")?;

    let mut loader = FileLoader::new(&args);
    let frame_interval_ms = 1000u64 / args.fps.max(1) as u64;
    let mut timestamp_ms = 0u64;
    let capacity_headroom = 256 * 1024;

    loop {
        match loader.load_next()? {
            Some(frame) => {
                let cap = frame.len() + capacity_headroom;
                coordinator.add_frame(frame, cap, timestamp_ms, TrackType::Video)?;
                timestamp_ms += frame_interval_ms;
            }
            None => break,
        }
        coordinator.do_work()?;
    }

    coordinator.do_work_ex(kvs_producer::coordinator::DoWorkOption::SendEndOfFrames)?;
    coordinator.close();
    std::thread::sleep(Duration::from_millis(100));
    Ok(())
}
