/// Bounded combined-output collection
///
/// stdout and stderr arrive on one stream. The collector keeps at most
/// `limit` bytes but keeps reading past the bound so the writer never blocks
/// on a full pipe; the excess is counted and discarded.
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::io::Read;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const CHUNK_SIZE: usize = 4096;

/// Output limits configuration
#[derive(Debug, Clone)]
pub struct OutputLimits {
    /// Bytes kept from the combined stream
    pub limit_bytes: usize,
    /// How long to wait for end-of-stream once the process is reaped
    pub drain_grace: Duration,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            limit_bytes: 1024 * 1024,
            drain_grace: Duration::from_millis(500),
        }
    }
}

/// How the collection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputIntegrity {
    Complete,
    TruncatedByLimit,
    /// A descendant still held the write end when the grace period ran out
    StreamStillOpen,
    ReadError,
}

#[derive(Debug, Clone)]
pub struct CollectedOutput {
    pub bytes: Vec<u8>,
    pub integrity: OutputIntegrity,
    /// Bytes seen on the stream, kept or not
    pub total_bytes: usize,
}

impl CollectedOutput {
    pub fn truncated(&self) -> bool {
        self.total_bytes > self.bytes.len()
    }
}

#[derive(Debug, Default)]
struct BoundedBuffer {
    data: Vec<u8>,
    total: usize,
}

impl BoundedBuffer {
    fn push(&mut self, chunk: &[u8], limit: usize) {
        self.total += chunk.len();
        let room = limit.saturating_sub(self.data.len());
        let take = room.min(chunk.len());
        self.data.extend_from_slice(&chunk[..take]);
    }
}

/// Background reader over one combined stream
pub struct CombinedOutputCollector {
    buffer: Arc<Mutex<BoundedBuffer>>,
    done: Receiver<OutputIntegrity>,
    handle: JoinHandle<()>,
}

impl CombinedOutputCollector {
    /// Start draining `stream` on a dedicated thread
    pub fn spawn<R: Read + Send + 'static>(stream: R, limit: usize) -> Self {
        let buffer = Arc::new(Mutex::new(BoundedBuffer::default()));
        let (tx, done) = bounded(1);
        let shared = Arc::clone(&buffer);

        let handle = thread::spawn(move || {
            let integrity = collect_stream(stream, limit, &shared);
            let _ = tx.send(integrity);
        });

        Self {
            buffer,
            done,
            handle,
        }
    }

    /// Wait up to `grace` for end-of-stream and return what was kept.
    ///
    /// If the stream is still open the reader thread is left running; it ends
    /// once the last holder of the write end exits.
    pub fn finish(self, grace: Duration) -> CollectedOutput {
        let integrity = match self.done.recv_timeout(grace) {
            Ok(integrity) => {
                let _ = self.handle.join();
                integrity
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Output stream still open {:?} after exit, collecting partial output", grace);
                OutputIntegrity::StreamStillOpen
            }
            Err(RecvTimeoutError::Disconnected) => OutputIntegrity::ReadError,
        };

        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let integrity = if integrity == OutputIntegrity::Complete && buffer.total > buffer.data.len() {
            OutputIntegrity::TruncatedByLimit
        } else {
            integrity
        };

        CollectedOutput {
            bytes: buffer.data.clone(),
            integrity,
            total_bytes: buffer.total,
        }
    }
}

fn collect_stream<R: Read>(mut stream: R, limit: usize, buffer: &Mutex<BoundedBuffer>) -> OutputIntegrity {
    let mut chunk = [0u8; CHUNK_SIZE];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return OutputIntegrity::Complete,
            Ok(n) => buffer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(&chunk[..n], limit),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("Output stream read failed: {}", e);
                return OutputIntegrity::ReadError;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_small_output_complete() {
        let collector = CombinedOutputCollector::spawn(Cursor::new(b"hi\n".to_vec()), 1024);
        let output = collector.finish(Duration::from_secs(5));

        assert_eq!(output.bytes, b"hi\n");
        assert_eq!(output.integrity, OutputIntegrity::Complete);
        assert!(!output.truncated());
    }

    #[test]
    fn test_output_beyond_limit_is_drained_and_discarded() {
        let data = vec![b'x'; 3 * CHUNK_SIZE + 17];
        let collector = CombinedOutputCollector::spawn(Cursor::new(data), 100);
        let output = collector.finish(Duration::from_secs(5));

        assert_eq!(output.bytes.len(), 100);
        assert_eq!(output.total_bytes, 3 * CHUNK_SIZE + 17);
        assert_eq!(output.integrity, OutputIntegrity::TruncatedByLimit);
        assert!(output.truncated());
    }

    #[test]
    fn test_open_stream_returns_partial_after_grace() {
        let (reader, mut writer) = UnixStream::pair().unwrap();
        writer.write_all(b"partial").unwrap();

        let collector = CombinedOutputCollector::spawn(reader, 1024);
        thread::sleep(Duration::from_millis(50));
        let output = collector.finish(Duration::from_millis(50));

        assert_eq!(output.integrity, OutputIntegrity::StreamStillOpen);
        assert_eq!(output.bytes, b"partial");
        drop(writer);
    }

    #[test]
    fn test_empty_stream() {
        let collector = CombinedOutputCollector::spawn(std::io::empty(), 16);
        let output = collector.finish(Duration::from_secs(1));
        assert!(output.bytes.is_empty());
        assert_eq!(output.integrity, OutputIntegrity::Complete);
    }
}
