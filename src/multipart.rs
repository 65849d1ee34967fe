//! Streaming `multipart/form-data` assembly.
//!
//! A [`Multipart`] collects parts in insertion order and records failures instead of raising
//! them, mirroring [`RequestBuilder`](crate::RequestBuilder). Once [`Multipart::close`] has been
//! called the assembler is frozen: further mutations record [`Error::MultipartClosed`] and are
//! dropped. [`Multipart::content_type`] and [`Multipart::into_reader`] fail with
//! [`Error::MultipartNotClosed`] until then.
//!
//! File contents are opened eagerly but streamed lazily, so the assembled reader never buffers
//! a whole file.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;

use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderValue};
use rand::RngExt;

use crate::body::BodySource;
use crate::error::{Error, ErrorList};
use crate::util::sorted_header_lines;

const MAX_BOUNDARY_LEN: usize = 70;

struct Part {
    headers: HeaderMap,
    content: Box<dyn BodySource>,
}

pub struct Multipart {
    boundary: String,
    parts: Vec<Part>,
    closed: bool,
    errors: ErrorList,
}

impl Multipart {
    pub fn new() -> Self {
        Self {
            boundary: random_boundary(),
            parts: Vec::new(),
            closed: false,
            errors: ErrorList::default(),
        }
    }

    /// Replaces the generated boundary. Only allowed before the first part is added.
    pub fn set_boundary(&mut self, boundary: impl Into<String>) -> &mut Self {
        if !self.ensure_open() {
            return self;
        }
        if !self.parts.is_empty() {
            self.errors.push(Error::LateBoundary);
            return self;
        }
        let boundary = boundary.into();
        if !is_valid_boundary(&boundary) {
            self.errors.push(Error::InvalidBoundary { boundary });
            return self;
        }
        self.boundary = boundary;
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Adds a file part read from `path`, with its file name and a content type guessed from the
    /// extension.
    pub fn file_part(&mut self, field: &str, path: impl AsRef<Path>) -> &mut Self {
        if !self.ensure_open() {
            return self;
        }
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(source) => {
                self.errors.push(Error::MultipartFile {
                    path: path.display().to_string(),
                    source,
                });
                return self;
            }
        };
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.push_file(field, &filename, Box::new(file))
    }

    pub fn file_from_memory(
        &mut self,
        field: &str,
        filename: &str,
        source: impl BodySource,
    ) -> &mut Self {
        if !self.ensure_open() {
            return self;
        }
        self.push_file(field, filename, Box::new(source))
    }

    /// Adds a part with fully custom MIME headers.
    pub fn raw_part(&mut self, headers: HeaderMap, source: impl BodySource) -> &mut Self {
        if !self.ensure_open() {
            return self;
        }
        self.parts.push(Part {
            headers,
            content: Box::new(source),
        });
        self
    }

    pub fn field_value(&mut self, field: &str, value: impl Into<String>) -> &mut Self {
        let value: String = value.into();
        self.field_reader(field, Cursor::new(value.into_bytes()))
    }

    pub fn field_reader(&mut self, field: &str, source: impl BodySource) -> &mut Self {
        if !self.ensure_open() {
            return self;
        }
        let disposition = format!("form-data; name=\"{}\"", escape_quotes(field));
        let Some(headers) = self.part_headers(&disposition, None) else {
            return self;
        };
        self.parts.push(Part {
            headers,
            content: Box::new(source),
        });
        self
    }

    /// Finalizes the form. Calling it again is a no-op.
    pub fn close(&mut self) -> &mut Self {
        self.closed = true;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn content_type(&self) -> Result<String, Error> {
        if !self.closed {
            return Err(Error::MultipartNotClosed);
        }
        Ok(format!("multipart/form-data; boundary={}", self.boundary))
    }

    pub fn err(&self) -> Option<&Error> {
        self.errors.first()
    }

    pub fn errors(&self) -> &[Error] {
        self.errors.as_slice()
    }

    pub fn into_reader(self) -> Result<MultipartReader, Error> {
        if !self.closed {
            return Err(Error::MultipartNotClosed);
        }
        Ok(MultipartReader::new(&self.boundary, self.parts))
    }

    /// Reader and content type of a closed form, or its first recorded failure.
    pub(crate) fn finish(self) -> Result<(MultipartReader, String), Error> {
        if let Some(error) = self.errors.into_first() {
            return Err(error);
        }
        let content_type = format!("multipart/form-data; boundary={}", self.boundary);
        let reader = MultipartReader::new(&self.boundary, self.parts);
        Ok((reader, content_type))
    }

    fn ensure_open(&mut self) -> bool {
        if self.closed {
            self.errors.push(Error::MultipartClosed);
            return false;
        }
        true
    }

    fn push_file(
        &mut self,
        field: &str,
        filename: &str,
        content: Box<dyn BodySource>,
    ) -> &mut Self {
        let disposition = format!(
            "form-data; name=\"{}\"; filename=\"{}\"",
            escape_quotes(field),
            escape_quotes(filename)
        );
        let mime = mime_guess::from_path(filename).first_or_octet_stream();
        let Some(headers) = self.part_headers(&disposition, Some(mime.essence_str())) else {
            return self;
        };
        self.parts.push(Part { headers, content });
        self
    }

    fn part_headers(
        &mut self,
        disposition: &str,
        content_type: Option<&str>,
    ) -> Option<HeaderMap> {
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(disposition) {
            Ok(value) => {
                headers.insert(CONTENT_DISPOSITION, value);
            }
            Err(source) => {
                self.errors.push(Error::InvalidHeaderValue {
                    name: CONTENT_DISPOSITION.as_str().to_owned(),
                    source,
                });
                return None;
            }
        }
        if let Some(content_type) = content_type
            && let Ok(value) = HeaderValue::from_str(content_type)
        {
            headers.insert(CONTENT_TYPE, value);
        }
        Some(headers)
    }
}

impl Default for Multipart {
    fn default() -> Self {
        Self::new()
    }
}

enum Segment {
    Bytes(Cursor<Bytes>),
    Stream(Box<dyn BodySource>),
}

/// The encoded form: boundary lines, part headers and part contents, read in order.
pub struct MultipartReader {
    segments: VecDeque<Segment>,
}

impl MultipartReader {
    fn new(boundary: &str, parts: Vec<Part>) -> Self {
        let mut segments = VecDeque::with_capacity(parts.len() * 2 + 1);
        let has_parts = !parts.is_empty();
        for (index, part) in parts.into_iter().enumerate() {
            let mut head = BytesMut::new();
            if index > 0 {
                head.extend_from_slice(b"\r\n");
            }
            head.extend_from_slice(b"--");
            head.extend_from_slice(boundary.as_bytes());
            head.extend_from_slice(b"\r\n");
            encode_part_headers(&part.headers, &mut head);
            head.extend_from_slice(b"\r\n");
            segments.push_back(Segment::Bytes(Cursor::new(head.freeze())));
            segments.push_back(Segment::Stream(part.content));
        }

        let trailer = if has_parts {
            format!("\r\n--{boundary}--\r\n")
        } else {
            format!("--{boundary}--\r\n")
        };
        segments.push_back(Segment::Bytes(Cursor::new(Bytes::from(trailer))));
        Self { segments }
    }
}

impl Read for MultipartReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while let Some(segment) = self.segments.front_mut() {
            let read = match segment {
                Segment::Bytes(cursor) => cursor.read(buf)?,
                Segment::Stream(stream) => stream.read(buf)?,
            };
            if read > 0 {
                return Ok(read);
            }
            self.segments.pop_front();
        }
        Ok(0)
    }
}

impl BodySource for MultipartReader {
    fn snapshot(&self) -> Option<Bytes> {
        let mut content = BytesMut::new();
        for segment in &self.segments {
            let chunk = match segment {
                Segment::Bytes(cursor) => cursor.snapshot()?,
                Segment::Stream(stream) => stream.snapshot()?,
            };
            content.extend_from_slice(&chunk);
        }
        Some(content.freeze())
    }
}

fn encode_part_headers(headers: &HeaderMap, out: &mut BytesMut) {
    for (name, value) in sorted_header_lines(headers) {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn is_valid_boundary(boundary: &str) -> bool {
    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN || boundary.ends_with(' ') {
        return false;
    }
    boundary.bytes().all(|byte| {
        byte.is_ascii_alphanumeric()
            || matches!(
                byte,
                b'\'' | b'(' | b')' | b'+' | b'_' | b',' | b'-' | b'.' | b'/' | b':' | b'=' | b'?'
                    | b' '
            )
    })
}

fn random_boundary() -> String {
    let mut rng = rand::rng();
    let (a, b, c) = (
        rng.random::<u64>(),
        rng.random::<u64>(),
        rng.random::<u64>(),
    );
    format!("{a:016x}{b:016x}{c:016x}")
}
