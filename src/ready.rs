//! One-shot readiness signal over a named FIFO.
//!
//! An external supervisor opens the FIFO for reading and waits for a
//! `READY` line. The write side opens non-blocking so a missing reader can
//! never wedge the pipeline; we retry for a bounded time, then give up.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::time::{Duration, Instant};

const RETRY_INTERVAL: Duration = Duration::from_millis(80);

/// Try to write `payload` to the FIFO at `path`, retrying while no reader
/// has the other end open, until `timeout` elapses. Errors are logged, not
/// returned: readiness is best-effort.
pub async fn signal_fifo(path: &str, payload: &str, timeout: Duration) {
    if path.is_empty() {
        return;
    }
    let timeout = if timeout.is_zero() {
        Duration::from_secs(8)
    } else {
        timeout
    };
    let payload = if payload.is_empty() { "READY\n" } else { payload };

    let deadline = Instant::now() + timeout;
    loop {
        match OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
        {
            Ok(mut f) => {
                if let Err(e) = f.write_all(payload.as_bytes()) {
                    log::warn!("[ready] fifo write failed: path={} err={}", path, e);
                }
                return;
            }
            // ENXIO: nobody has the read side open yet.
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                if Instant::now() >= deadline {
                    log::warn!(
                        "[ready] timeout waiting for fifo reader: path={} timeout={:?}",
                        path,
                        timeout
                    );
                    return;
                }
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => {
                log::warn!("[ready] fifo open failed: path={} err={}", path, e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_fifo_gives_up_quietly() {
        // Opening a nonexistent path is a plain error, not a retry loop.
        let t0 = Instant::now();
        signal_fifo(
            "/nonexistent/dir/ready.fifo",
            "READY\n",
            Duration::from_secs(8),
        )
        .await;
        assert!(t0.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_empty_path_is_noop() {
        signal_fifo("", "READY\n", Duration::from_secs(8)).await;
    }

    #[tokio::test]
    async fn test_regular_file_receives_payload() {
        // A regular file stands in for the FIFO: the open path is the same,
        // minus the ENXIO dance.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ready.fifo");
        std::fs::write(&path, b"").unwrap();

        signal_fifo(path.to_str().unwrap(), "READY\n", Duration::from_secs(1)).await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "READY\n");
    }
}
