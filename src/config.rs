use std::env;

use crate::dispatch::WINDOW_COUNT;
use crate::window::WinHorizon;

/// Pipeline configuration loaded from environment variables.
///
/// Every knob has a default; a bare environment runs the full pipeline
/// against local paths. `dotenv` is loaded by the binaries before this is
/// read.
#[derive(Debug, Clone)]
pub struct Config {
    pub brokers: Vec<String>,
    pub group: String,
    pub topic: String,
    pub out_topic: String,

    pub spool_path: String,
    pub ready_fifo: String,

    pub decode_workers: usize,
    pub decode_queue: usize,
    pub margin_channel: usize,
    /// Intra-block emit parallelism; 1 = sequential.
    pub emit_parts: usize,

    pub win_secs: [i64; WINDOW_COUNT],
    pub emit_every: [u64; WINDOW_COUNT],

    pub drop_bad_addr: bool,
    pub drop_no_token: bool,

    pub addr_shards: usize,
    pub token_shards: usize,
}

impl Default for Config {
    fn default() -> Self {
        let win_secs = {
            let all = WinHorizon::all();
            [all[0].secs(), all[1].secs(), all[2].secs(), all[3].secs()]
        };
        Config {
            brokers: vec!["127.0.0.1:9092".to_string()],
            group: "blockflow-processor".to_string(),
            topic: "chain.blocks".to_string(),
            out_topic: "blockflow.signals".to_string(),
            spool_path: "./data/spool.wal".to_string(),
            ready_fifo: "./data/ready/processor.ready.fifo".to_string(),
            decode_workers: 20,
            decode_queue: 1024,
            margin_channel: 16,
            emit_parts: 1,
            win_secs,
            emit_every: [50, 200, 1000, 5000],
            drop_bad_addr: true,
            drop_no_token: false,
            addr_shards: 64,
            token_shards: 32,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Config::default();
        Config {
            brokers: env_list("BLOCKFLOW_BROKERS").unwrap_or(d.brokers),
            group: env_str("BLOCKFLOW_GROUP").unwrap_or(d.group),
            topic: env_str("BLOCKFLOW_TOPIC").unwrap_or(d.topic),
            out_topic: env_str("BLOCKFLOW_OUT_TOPIC").unwrap_or(d.out_topic),
            spool_path: env_str("BLOCKFLOW_SPOOL").unwrap_or(d.spool_path),
            ready_fifo: env_str("BLOCKFLOW_READY_FIFO").unwrap_or(d.ready_fifo),
            decode_workers: env_parse("BLOCKFLOW_DECODE_WORKERS").unwrap_or(d.decode_workers),
            decode_queue: env_parse("BLOCKFLOW_DECODE_QUEUE").unwrap_or(d.decode_queue),
            margin_channel: env_parse("BLOCKFLOW_MARGIN_CHANNEL").unwrap_or(d.margin_channel),
            emit_parts: env_parse("BLOCKFLOW_EMIT_PARTS").unwrap_or(d.emit_parts),
            win_secs: env_array("BLOCKFLOW_WIN_SECS").unwrap_or(d.win_secs),
            emit_every: env_array("BLOCKFLOW_EMIT_EVERY").unwrap_or(d.emit_every),
            drop_bad_addr: env_bool("BLOCKFLOW_DROP_BAD_ADDR").unwrap_or(d.drop_bad_addr),
            drop_no_token: env_bool("BLOCKFLOW_DROP_NO_TOKEN").unwrap_or(d.drop_no_token),
            addr_shards: env_parse("BLOCKFLOW_ADDR_SHARDS").unwrap_or(d.addr_shards),
            token_shards: env_parse("BLOCKFLOW_TOKEN_SHARDS").unwrap_or(d.token_shards),
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = env_str(key)?;
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_str(key)?.parse().ok()
}

fn env_bool(key: &str) -> Option<bool> {
    match env_str(key)?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_array<T: std::str::FromStr + Copy + Default>(key: &str) -> Option<[T; WINDOW_COUNT]> {
    let raw = env_str(key)?;
    let parts: Vec<T> = raw
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    if parts.len() != WINDOW_COUNT {
        return None;
    }
    let mut out = [T::default(); WINDOW_COUNT];
    out.copy_from_slice(&parts);
    Some(out)
}
