//! Step output consumption.
//!
//! A [`LineLogger`] drains the multi-part stream a backend produces for a
//! step and feeds it, line by line, to a [`LogSink`] keyed by the step's
//! display alias. Parts are consumed strictly in the order they arrive.

use async_trait::async_trait;
use console::style;
use kestrel_core::backend::Step;
use kestrel_core::multipart::MultipartReader;
use kestrel_core::ports::Logger;
use kestrel_core::{Error, Result};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

/// Destination for step output lines.
pub trait LogSink: Send + Sync {
    /// Receive one complete line. `number` starts at zero for each step;
    /// `elapsed` is measured from the first byte consumed for the step.
    fn write_line(&self, alias: &str, number: usize, elapsed: Duration, line: &str);
}

/// Prints `[alias:L<n>:<secs>s] <line>` to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn write_line(&self, alias: &str, number: usize, elapsed: Duration, line: &str) {
        let prefix = format!("[{}:L{}:{}s]", alias, number, elapsed.as_secs());
        println!("{} {}", style(prefix).cyan(), line);
    }
}

/// One captured output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub alias: String,
    pub number: usize,
    pub line: String,
}

/// Sink that keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<LogLine>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Text of the lines written for `alias`, in order.
    pub fn lines_for(&self, alias: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|l| l.alias == alias)
            .map(|l| l.line)
            .collect()
    }
}

impl LogSink for MemorySink {
    fn write_line(&self, alias: &str, number: usize, _elapsed: Duration, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(LogLine {
                alias: alias.to_string(),
                number,
                line: line.to_string(),
            });
        }
    }
}

/// Splits a byte stream into lines for a single step.
pub struct LineWriter {
    alias: String,
    sink: Arc<dyn LogSink>,
    started: Instant,
    number: usize,
    buffer: Vec<u8>,
}

impl LineWriter {
    pub fn new(alias: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            alias: alias.into(),
            sink,
            started: Instant::now(),
            number: 0,
            buffer: Vec::new(),
        }
    }

    pub fn write(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.emit(&line[..line.len() - 1]);
        }
    }

    /// Emit any trailing partial line.
    pub fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.emit(&line);
        }
    }

    fn emit(&mut self, line: &[u8]) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let text = String::from_utf8_lossy(line);
        self.sink
            .write_line(&self.alias, self.number, self.started.elapsed(), &text);
        self.number += 1;
    }
}

/// [`Logger`] copying each step's output to a [`LogSink`].
#[derive(Clone)]
pub struct LineLogger {
    sink: Arc<dyn LogSink>,
}

impl LineLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Logger for LineLogger {
    async fn log(&self, step: &Step, mut reader: MultipartReader) -> Result<()> {
        let mut part = reader
            .next_part()
            .await?
            .ok_or_else(|| Error::LogStream(format!("{}: no output stream", step.alias)))?;

        let mut writer = LineWriter::new(&step.alias, Arc::clone(&self.sink));
        loop {
            while let Some(chunk) = part.next_chunk().await {
                match chunk {
                    Ok(bytes) => writer.write(&bytes),
                    Err(e) => {
                        warn!(step = %step.alias, error = %e, "Failed to copy step output");
                        break;
                    }
                }
            }
            match reader.next_part().await {
                Ok(Some(next)) => part = next,
                Ok(None) => break,
                Err(e) => {
                    warn!(step = %step.alias, error = %e, "Failed to read step output");
                    break;
                }
            }
        }
        writer.flush();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use kestrel_core::multipart::{Part, part_error};
    use pretty_assertions::assert_eq;

    fn step(alias: &str) -> Step {
        Step {
            alias: alias.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_line_writer_splits_chunks() {
        let sink = Arc::new(MemorySink::new());
        let mut writer = LineWriter::new("build", sink.clone());
        writer.write(b"go ver");
        writer.write(b"sion\r\nok\n\npartial");
        assert_eq!(sink.lines_for("build"), vec!["go version", "ok", ""]);

        writer.flush();
        let lines = sink.lines();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3].line, "partial");
        assert_eq!(lines[3].number, 3);
    }

    #[tokio::test]
    async fn test_logger_consumes_parts_in_order() {
        let sink = Arc::new(MemorySink::new());
        let logger = LineLogger::new(sink.clone());
        let reader = MultipartReader::new(stream::iter([
            Ok(Part::from_bytes("one\ntw")),
            Ok(Part::from_bytes("o\nthree\n")),
        ]));

        logger.log(&step("test"), reader).await.unwrap();
        assert_eq!(sink.lines_for("test"), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_logger_requires_first_part() {
        let logger = LineLogger::new(Arc::new(MemorySink::new()));

        let err = logger
            .log(&step("test"), MultipartReader::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LogStream(_)));

        let failing = MultipartReader::new(stream::iter([part_error("tail failed")]));
        assert!(logger.log(&step("test"), failing).await.is_err());
    }

    #[tokio::test]
    async fn test_copy_errors_end_the_step_quietly() {
        let sink = Arc::new(MemorySink::new());
        let logger = LineLogger::new(sink.clone());
        let body = stream::iter([
            Ok(b"before\n".to_vec()),
            Err(std::io::Error::other("connection reset")),
            Ok(b"after\n".to_vec()),
        ]);

        logger
            .log(&step("test"), MultipartReader::single(body))
            .await
            .unwrap();
        assert_eq!(sink.lines_for("test"), vec!["before"]);
    }

    #[tokio::test]
    async fn test_steps_are_keyed_by_alias() {
        let sink = Arc::new(MemorySink::new());
        let logger = LineLogger::new(sink.clone());
        logger
            .log(&step("a"), MultipartReader::single(stream::iter([Ok(b"x\n".to_vec())])))
            .await
            .unwrap();
        logger
            .log(&step("b"), MultipartReader::single(stream::iter([Ok(b"y\n".to_vec())])))
            .await
            .unwrap();
        assert_eq!(sink.lines_for("a"), vec!["x"]);
        assert_eq!(sink.lines_for("b"), vec!["y"]);
        assert!(sink.lines().iter().all(|l| l.number == 0));
    }
}
