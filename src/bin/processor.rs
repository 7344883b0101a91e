//! Processor runtime: replay a captured block feed through the full
//! ingest-to-window pipeline.
//!
//! Usage:
//!   cargo run --release --bin processor
//!
//! Environment variables (see `Config::from_env` for the full set):
//!   BLOCKFLOW_REPLAY      - JSONL block feed to consume (required)
//!   BLOCKFLOW_OUT         - sink output path (default: ./data/signals.jsonl)
//!   BLOCKFLOW_SPOOL       - spool WAL path
//!   BLOCKFLOW_RING_BLOCKS - ring geometry override for small replays

use std::env;
use std::sync::Arc;

use dotenv::dotenv;
use log::info;

use blockflow::config::Config;
use blockflow::dispatch::RingLimits;
use blockflow::pipeline::Pipeline;
use blockflow::sink::JsonlSink;
use blockflow::stream::JsonlBlockStream;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    info!("🚀 blockflow processor");
    let cfg = Config::from_env();
    info!("   ├─ Topic: {} (group {})", cfg.topic, cfg.group);
    info!("   ├─ Spool: {}", cfg.spool_path);
    info!(
        "   ├─ Decode: {} workers, queue {}",
        cfg.decode_workers, cfg.decode_queue
    );
    info!("   ├─ Windows: {:?} s", cfg.win_secs);
    info!("   └─ Emit cadence: {:?}", cfg.emit_every);

    let Some(replay_path) = env::var("BLOCKFLOW_REPLAY").ok().filter(|p| !p.is_empty()) else {
        info!("⚠️  BLOCKFLOW_REPLAY not set, nothing to consume");
        info!("   └─ Exiting gracefully...");
        return Ok(());
    };

    let mut limits = RingLimits::default();
    if let Some(blocks) = env::var("BLOCKFLOW_RING_BLOCKS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
    {
        limits.max_blocks_per_window = blocks;
    }

    let stream = JsonlBlockStream::open(&replay_path)?;
    info!("✅ Replay source: {} ({} blocks)", replay_path, stream.len());

    let out_path =
        env::var("BLOCKFLOW_OUT").unwrap_or_else(|_| "./data/signals.jsonl".to_string());
    let sink = Arc::new(JsonlSink::open(&out_path)?);
    info!("✅ Sink: {}", out_path);

    let handle = Pipeline::start(&cfg, limits, Box::new(stream), sink)?;
    handle.join().await?;

    info!("✅ Replay complete");
    Ok(())
}
