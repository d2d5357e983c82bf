//! Readiness detection on the child's standard output.

use crate::config::ServerDefaults;
use crate::error::{RedisServerError, Result};
use regex::Regex;
use std::io::BufRead;
use tracing::{debug, trace};

/// What the output stream showed before detection stopped reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// A line matched the readiness pattern.
    Ready { lines_read: usize, line: String },
    /// The stream ended first: the child exited or closed stdout.
    ProcessExitedBeforeReady {
        lines_read: usize,
        last_line: Option<String>,
    },
}

impl ReadyOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadyOutcome::Ready { .. })
    }

    pub fn lines_read(&self) -> usize {
        match self {
            ReadyOutcome::Ready { lines_read, .. }
            | ReadyOutcome::ProcessExitedBeforeReady { lines_read, .. } => *lines_read,
        }
    }

    /// Convert into a `Result`, mapping a premature end of stream to `NotReady`.
    pub fn into_result(self) -> Result<String> {
        match self {
            ReadyOutcome::Ready { line, .. } => Ok(line),
            ReadyOutcome::ProcessExitedBeforeReady {
                lines_read,
                last_line,
            } => Err(RedisServerError::NotReady {
                lines_read,
                last_line,
            }),
        }
    }
}

/// Matches output lines against the readiness pattern.
#[derive(Debug, Clone)]
pub struct ReadinessDetector {
    pattern: Regex,
}

impl Default for ReadinessDetector {
    fn default() -> Self {
        Self::new(ServerDefaults::ready_pattern())
    }
}

impl ReadinessDetector {
    pub fn new(pattern: Regex) -> Self {
        Self { pattern }
    }

    pub fn is_ready_line(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }

    /// Read lines until one matches or the stream ends.
    ///
    /// Blocks for as long as the stream stays open without producing a match.
    /// Nothing past the matching line is consumed, so the reader can be handed
    /// on to whoever drains the rest of the output.
    pub fn await_ready<R: BufRead + ?Sized>(&self, reader: &mut R) -> Result<ReadyOutcome> {
        let mut buf = Vec::new();
        let mut lines_read = 0;
        let mut last_line = None;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                debug!("Output ended after {} lines without a ready line", lines_read);
                return Ok(ReadyOutcome::ProcessExitedBeforeReady {
                    lines_read,
                    last_line,
                });
            }
            lines_read += 1;

            let line = String::from_utf8_lossy(&buf)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            trace!("redis-server: {}", line);

            if self.is_ready_line(&line) {
                debug!("Ready line seen after {} lines", lines_read);
                return Ok(ReadyOutcome::Ready { lines_read, line });
            }
            last_line = Some(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor, Read};

    const READY: &str = "The server is now ready to accept connections on port 6379";

    #[test]
    fn test_ready_after_exactly_three_lines() {
        let output = format!("starting up\nloading data\n{}\nafter ready\n", READY);
        let mut reader = Cursor::new(output.into_bytes());

        let outcome = ReadinessDetector::default().await_ready(&mut reader).unwrap();

        assert_eq!(
            outcome,
            ReadyOutcome::Ready {
                lines_read: 3,
                line: READY.to_string()
            }
        );
        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "after ready\n");
    }

    #[test]
    fn test_empty_stream_is_not_ready() {
        let mut reader = Cursor::new(Vec::<u8>::new());
        let outcome = ReadinessDetector::default().await_ready(&mut reader).unwrap();

        assert!(!outcome.is_ready());
        assert_eq!(outcome.lines_read(), 0);
        assert!(matches!(
            outcome.into_result(),
            Err(RedisServerError::NotReady {
                lines_read: 0,
                last_line: None
            })
        ));
    }

    #[test]
    fn test_stream_ending_without_match_keeps_last_line() {
        let mut reader = Cursor::new(b"starting up\n# Fatal error, can't open config\n".to_vec());
        let outcome = ReadinessDetector::default().await_ready(&mut reader).unwrap();

        assert_eq!(
            outcome,
            ReadyOutcome::ProcessExitedBeforeReady {
                lines_read: 2,
                last_line: Some("# Fatal error, can't open config".to_string())
            }
        );
    }

    #[test]
    fn test_redis_log_prefix_and_crlf() {
        let line = format!("[1234] 19 Oct 10:00:00.000 * {}\r\n", READY);
        let mut reader = BufReader::new(Cursor::new(line.into_bytes()));
        let outcome = ReadinessDetector::default().await_ready(&mut reader).unwrap();

        assert!(outcome.is_ready());
        assert!(outcome.into_result().unwrap().ends_with("port 6379"));
    }

    #[test]
    fn test_match_is_case_sensitive() {
        let mut reader = Cursor::new(READY.to_lowercase().into_bytes());
        let outcome = ReadinessDetector::default().await_ready(&mut reader).unwrap();
        assert!(!outcome.is_ready());
    }

    #[test]
    fn test_invalid_utf8_is_tolerated() {
        let mut output = vec![0xff, 0xfe, b'\n'];
        output.extend_from_slice(READY.as_bytes());
        let mut reader = Cursor::new(output);

        let outcome = ReadinessDetector::default().await_ready(&mut reader).unwrap();
        assert_eq!(outcome.lines_read(), 2);
        assert!(outcome.is_ready());
    }

    #[test]
    fn test_custom_pattern() {
        let detector = ReadinessDetector::new(Regex::new(r"^READY \d+$").unwrap());
        let mut reader = Cursor::new(b"boot\nREADY 42\n".to_vec());
        assert!(detector.await_ready(&mut reader).unwrap().is_ready());
    }
}
