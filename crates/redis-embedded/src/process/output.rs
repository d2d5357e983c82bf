//! Background handling of the child's output streams.
//!
//! stdout is watched for the readiness line and then forwarded; stderr is
//! forwarded from the start. Forwarding goes to `tracing` at debug level and
//! keeps both pipes empty, so redis-server never blocks on a full pipe.

use super::readiness::{ReadinessDetector, ReadyOutcome};
use crate::config::ServerDefaults;
use crate::error::{RedisServerError, Result};
use std::io::{BufRead, BufReader, Read};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A thread reading one of the child's output streams.
#[derive(Debug)]
pub struct OutputForwarder {
    stream: &'static str,
    handle: JoinHandle<()>,
}

impl OutputForwarder {
    /// Forward every line of `stream` to tracing until it closes.
    pub fn spawn<R: Read + Send + 'static>(pid: u32, stream: &'static str, reader: R) -> Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("redis-{}-{}", pid, stream))
            .spawn(move || forward_lines(pid, stream, &mut BufReader::new(reader)))?;
        Ok(Self { stream, handle })
    }

    /// Watch stdout for the readiness line, then keep forwarding it.
    ///
    /// The outcome of detection is sent on the returned channel exactly once.
    pub fn spawn_ready_watch<R: Read + Send + 'static>(
        pid: u32,
        reader: R,
        detector: ReadinessDetector,
    ) -> Result<(Self, Receiver<Result<ReadyOutcome>>)> {
        let (tx, rx) = mpsc::channel();
        let stream = "stdout";
        let handle = thread::Builder::new()
            .name(format!("redis-{}-{}", pid, stream))
            .spawn(move || {
                let mut reader = BufReader::new(reader);
                let outcome = detector.await_ready(&mut reader);
                let ready = matches!(outcome, Ok(ReadyOutcome::Ready { .. }));
                // The receiver is gone if start() already timed out
                let _ = tx.send(outcome);
                if ready {
                    forward_lines(pid, stream, &mut reader);
                }
            })?;
        Ok((Self { stream, handle }, rx))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait up to `timeout` for the stream to close, then join the thread.
    ///
    /// A stream still held open by some grandchild would block a plain join
    /// forever; in that case the thread is detached instead.
    pub fn finish(self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() && Instant::now() < deadline {
            thread::sleep(ServerDefaults::EXIT_POLL_INTERVAL);
        }
        if self.is_finished() {
            if self.handle.join().is_err() {
                debug!("{} forwarder panicked", self.stream);
            }
        } else {
            debug!("{} still open after child exit, detaching forwarder", self.stream);
        }
    }
}

fn forward_lines<R: BufRead>(pid: u32, stream: &'static str, reader: &mut R) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                debug!(pid, stream, "{}", line.trim_end());
            }
            Err(e) => {
                trace!("Reading redis-server {} failed: {}", stream, e);
                break;
            }
        }
    }
    trace!("redis-server {} closed", stream);
}

/// Wait for the detection outcome, for at most `timeout` if one is given.
pub fn recv_outcome(
    rx: &Receiver<Result<ReadyOutcome>>,
    timeout: Option<Duration>,
) -> Result<ReadyOutcome> {
    match timeout {
        Some(timeout) => rx.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => RedisServerError::StartupTimeout(timeout),
            mpsc::RecvTimeoutError::Disconnected => watcher_lost(),
        })?,
        None => rx.recv().map_err(|_| watcher_lost())?,
    }
}

fn watcher_lost() -> RedisServerError {
    RedisServerError::Io {
        message: "stdout watcher exited without reporting readiness".to_string(),
        path: None,
        source: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_ready_watch_reports_outcome_and_drains() {
        let output = b"boot\nThe server is now ready to accept connections on port 1\nmore\n".to_vec();
        let (forwarder, rx) =
            OutputForwarder::spawn_ready_watch(1, Cursor::new(output), ReadinessDetector::default())
                .unwrap();

        let outcome = recv_outcome(&rx, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(outcome.lines_read(), 2);

        forwarder.finish(Duration::from_secs(5));
    }

    #[test]
    fn test_ready_watch_reports_eof() {
        let (forwarder, rx) =
            OutputForwarder::spawn_ready_watch(1, Cursor::new(Vec::new()), ReadinessDetector::default())
                .unwrap();

        let outcome = recv_outcome(&rx, None).unwrap();
        assert!(!outcome.is_ready());
        forwarder.finish(Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_when_no_outcome() {
        let (_tx, rx) = mpsc::channel::<Result<ReadyOutcome>>();
        let err = recv_outcome(&rx, Some(Duration::from_millis(50))).unwrap_err();
        assert!(matches!(err, RedisServerError::StartupTimeout(_)));
    }

    #[test]
    fn test_disconnected_channel() {
        let (tx, rx) = mpsc::channel::<Result<ReadyOutcome>>();
        drop(tx);
        assert!(matches!(
            recv_outcome(&rx, None),
            Err(RedisServerError::Io { .. })
        ));
    }

    #[test]
    fn test_plain_forwarder_finishes_on_eof() {
        let forwarder = OutputForwarder::spawn(1, "stderr", Cursor::new(b"warning\n".to_vec())).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !forwarder.is_finished() {
            assert!(Instant::now() < deadline, "forwarder still running after EOF");
            thread::sleep(Duration::from_millis(10));
        }
        forwarder.finish(Duration::from_secs(5));
    }
}
