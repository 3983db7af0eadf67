//! Blocking stream readers feeding a shared capture buffer.

use std::io::{self, Read};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// How long to wait for a stream to reach EOF once the process has exited.
/// A grandchild that inherited the write end can keep it open indefinitely.
pub(crate) const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const CHUNK_SIZE: usize = 8192;

/// Accumulates everything read from one stream on a dedicated thread.
pub(crate) struct OutputCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    done: oneshot::Receiver<()>,
    label: &'static str,
}

impl OutputCapture {
    pub(crate) fn start<R>(mut reader: R, label: &'static str) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = oneshot::channel();
        let sink = Arc::clone(&buf);

        thread::Builder::new()
            .name(format!("substrate-{label}-reader"))
            .spawn(move || {
                let mut chunk = [0u8; CHUNK_SIZE];
                loop {
                    match reader.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => {
                            let mut guard = sink.lock().unwrap_or_else(|p| p.into_inner());
                            guard.extend_from_slice(&chunk[..n]);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        // A PTY master reports EIO once the slave side is gone.
                        Err(e) => {
                            debug!(stream = label, error = %e, "reader stopped");
                            break;
                        }
                    }
                }
                let _ = tx.send(());
            })?;

        Ok(Self { buf, done, label })
    }

    /// Wait (bounded) for EOF, then return everything captured so far.
    pub(crate) async fn finish(self, drain: Duration) -> Vec<u8> {
        if tokio::time::timeout(drain, self.done).await.is_err() {
            warn!(
                stream = self.label,
                drain_ms = drain.as_millis() as u64,
                "stream still open after process exit; returning partial output"
            );
        }
        let mut guard = self.buf.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::take(&mut *guard)
    }
}
