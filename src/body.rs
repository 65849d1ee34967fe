//! Request bodies and the replay capability.
//!
//! Every body-setting call on [`RequestBuilder`](crate::RequestBuilder) goes through
//! [`Body::from_source`]. Sources whose full content is known up front (byte buffers, cursors,
//! all-in-memory multipart forms) expose it through [`BodySource::snapshot`]; the body then gets
//! a known length and a replay function that yields fresh, independent readers. Anything else is
//! streamed once and marked non-replayable.

use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{BoxError, Error};

pub type BodyReader = Box<dyn Read + Send + Sync>;

type ReplayFn = Arc<dyn Fn() -> BodyReader + Send + Sync>;

/// A readable body source, optionally able to describe its full remaining content.
pub trait BodySource: Read + Send + Sync + 'static {
    /// The unread content of this source, when it can be produced without consuming it.
    fn snapshot(&self) -> Option<Bytes> {
        None
    }
}

impl<T> BodySource for Cursor<T>
where
    T: AsRef<[u8]> + Send + Sync + 'static,
{
    fn snapshot(&self) -> Option<Bytes> {
        let data = self.get_ref().as_ref();
        let position = usize::try_from(self.position())
            .unwrap_or(usize::MAX)
            .min(data.len());
        Some(Bytes::copy_from_slice(&data[position..]))
    }
}

impl BodySource for bytes::buf::Reader<Bytes> {
    fn snapshot(&self) -> Option<Bytes> {
        Some(self.get_ref().clone())
    }
}

impl BodySource for io::Empty {
    fn snapshot(&self) -> Option<Bytes> {
        Some(Bytes::new())
    }
}

impl BodySource for std::fs::File {}

impl BodySource for Box<dyn BodySource> {
    fn snapshot(&self) -> Option<Bytes> {
        (**self).snapshot()
    }
}

/// Wraps an arbitrary reader as a stream-once, non-replayable body source.
pub struct ReadOnce<R>(pub R);

impl<R: Read> Read for ReadOnce<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read + Send + Sync + 'static> BodySource for ReadOnce<R> {}

/// Pluggable body encoding used by
/// [`RequestBuilder::encoded_body`](crate::RequestBuilder::encoded_body).
pub trait BodyEncoder {
    fn encode(&self) -> Result<Box<dyn BodySource>, BoxError>;
}

pub struct Body {
    reader: Option<BodyReader>,
    content_length: Option<u64>,
    replay: Option<ReplayFn>,
}

impl Body {
    /// Attaches `source`, deriving a replay function when the source can snapshot itself.
    pub fn from_source<S: BodySource>(source: S) -> Self {
        let Some(snapshot) = source.snapshot() else {
            return Self {
                reader: Some(Box::new(source)),
                content_length: None,
                replay: None,
            };
        };
        if snapshot.is_empty() {
            return Self::empty();
        }

        let content_length = snapshot.len() as u64;
        let replay: ReplayFn = Arc::new(move || -> BodyReader {
            Box::new(Cursor::new(snapshot.clone()))
        });
        Self {
            reader: Some(replay()),
            content_length: Some(content_length),
            replay: Some(replay),
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::from_source(Cursor::new(bytes.into()))
    }

    /// The canonical zero-length body.
    pub fn empty() -> Self {
        let replay: ReplayFn = Arc::new(|| -> BodyReader { Box::new(io::empty()) });
        Self {
            reader: Some(replay()),
            content_length: Some(0),
            replay: Some(replay),
        }
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn is_empty(&self) -> bool {
        self.content_length == Some(0)
    }

    pub fn is_replayable(&self) -> bool {
        self.replay.is_some()
    }

    /// A fresh reader over the full content, independent of this body's own read position.
    pub fn replay(&self) -> Option<BodyReader> {
        self.replay.as_ref().map(|replay| replay())
    }

    /// Takes the single-use reader. Returns `None` once it has been taken.
    pub fn take_reader(&mut self) -> Option<BodyReader> {
        self.reader.take()
    }

    /// Reinstalls a fresh reader from the replay function, for retransmission.
    pub fn rewind(&mut self) -> Result<(), Error> {
        let reader = self.replay().ok_or(Error::BodyNotReplayable)?;
        self.reader = Some(reader);
        Ok(())
    }

    /// An independent copy carrying a fresh reader, if the body is replayable.
    pub fn try_clone(&self) -> Option<Self> {
        let replay = self.replay.clone()?;
        Some(Self {
            reader: Some(replay()),
            content_length: self.content_length,
            replay: Some(replay),
        })
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => reader.read(buf),
            None => Ok(0),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Body")
            .field("content_length", &self.content_length)
            .field("replayable", &self.is_replayable())
            .field("consumed", &self.reader.is_none())
            .finish()
    }
}
