//! Multi-part byte streams produced by a backend for a single step.
//!
//! A backend hands out a [`MultipartReader`] per step. Each [`Part`] is an
//! ordered stream of byte chunks with optional headers; parts are yielded
//! in the order the backend emits them.

use crate::{Error, Result};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::fmt;

/// Ordered stream of raw byte chunks.
pub type ByteStream = BoxStream<'static, std::io::Result<Vec<u8>>>;

/// One part of a multi-part stream.
pub struct Part {
    headers: BTreeMap<String, String>,
    body: ByteStream,
}

impl Part {
    pub fn new(body: impl Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.boxed(),
        }
    }

    /// A part whose body is a single in-memory buffer.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::new(stream::iter([Ok(data.into())]))
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Read the next chunk of the body. `None` once the body is exhausted.
    pub async fn next_chunk(&mut self) -> Option<std::io::Result<Vec<u8>>> {
        self.body.next().await
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Part").field("headers", &self.headers).finish()
    }
}

/// Reader over the parts of a step's output.
pub struct MultipartReader {
    parts: BoxStream<'static, Result<Part>>,
}

impl MultipartReader {
    pub fn new(parts: impl Stream<Item = Result<Part>> + Send + 'static) -> Self {
        Self {
            parts: parts.boxed(),
        }
    }

    /// A reader with exactly one part wrapping `body`.
    pub fn single(body: impl Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static) -> Self {
        Self::new(stream::iter([Ok(Part::new(body))]))
    }

    /// A reader that yields no parts.
    pub fn empty() -> Self {
        Self::new(stream::empty())
    }

    /// Obtain the next part, or `None` when the stream is exhausted.
    pub async fn next_part(&mut self) -> Result<Option<Part>> {
        match self.parts.next().await {
            Some(Ok(part)) => Ok(Some(part)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for MultipartReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartReader").finish_non_exhaustive()
    }
}

/// Convert a backend failure into a part-level error.
pub fn part_error(message: impl Into<String>) -> Result<Part> {
    Err(Error::LogStream(message.into()))
}
