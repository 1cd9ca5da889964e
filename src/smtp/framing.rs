//! Splitting the inbound byte stream into command lines and message bodies

use memchr::memmem;

const BODY_TERMINATOR: &[u8] = b"\r\n.\r\n";
/// A body that is empty ends with the `.` line right after the DATA line
const EMPTY_BODY_TERMINATOR: &[u8] = b".\r\n";

/// How the next buffered bytes are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// Bytes are command lines terminated by LF (CRLF expected)
    Line,
    /// Bytes are message content ending with `CRLF . CRLF`
    Body,
}

/// A logical unit produced from the byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A command line without its terminator
    Line(String),
    /// A complete message body without the `CRLF . CRLF` terminator
    Body(String),
    /// A command line exceeded the configured maximum and was discarded
    LineTooLong,
}

/// Buffers raw reads from one connection and cuts them into frames.
///
/// Bytes that do not yet form a complete frame stay buffered until the
/// next [`FrameReader::push`]. The mode is switched by the caller between
/// calls to [`FrameReader::next_frame`], so pipelined input following a
/// `DATA` line is read as body text.
#[derive(Debug)]
pub struct FrameReader {
    buffer: Vec<u8>,
    mode: FrameMode,
    max_line_length: usize,
    /// Offset from which the body terminator search resumes
    scan_from: usize,
    /// Set while dropping the remainder of an over-long line
    discarding: bool,
}

impl FrameReader {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            buffer: Vec::new(),
            mode: FrameMode::Line,
            max_line_length,
            scan_from: 0,
            discarding: false,
        }
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: FrameMode) {
        self.mode = mode;
        self.scan_from = 0;
    }

    /// Append a chunk read from the socket
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Number of bytes waiting to become a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Number of line terminators waiting to become a frame
    pub fn buffered_lines(&self) -> usize {
        memchr::memchr_iter(b'\n', &self.buffer).count()
    }

    /// Take the next complete frame in the current mode, if any
    pub fn next_frame(&mut self) -> Option<Frame> {
        match self.mode {
            FrameMode::Line => self.next_line(),
            FrameMode::Body => self.next_body(),
        }
    }

    /// Push a chunk and collect every frame it completes without changing mode
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.push(chunk);
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    fn next_line(&mut self) -> Option<Frame> {
        let Some(newline) = memchr::memchr(b'\n', &self.buffer) else {
            // A trailing CR may be the first half of the terminator.
            let pending = self.buffer.strip_suffix(b"\r").unwrap_or(&self.buffer);
            if !self.discarding && pending.len() > self.max_line_length {
                self.buffer.clear();
                self.discarding = true;
                return Some(Frame::LineTooLong);
            }
            if self.discarding {
                self.buffer.clear();
            }
            return None;
        };

        let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
        if self.discarding {
            self.discarding = false;
            return self.next_line();
        }

        let line = raw.strip_suffix(b"\n").unwrap_or(&raw);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.len() > self.max_line_length {
            return Some(Frame::LineTooLong);
        }
        Some(Frame::Line(String::from_utf8_lossy(line).into_owned()))
    }

    fn next_body(&mut self) -> Option<Frame> {
        if self.buffer.starts_with(EMPTY_BODY_TERMINATOR) {
            self.buffer.drain(..EMPTY_BODY_TERMINATOR.len());
            self.scan_from = 0;
            return Some(Frame::Body(String::new()));
        }

        // The terminator may straddle two reads, so the search always
        // covers the tail of what was buffered before.
        let start = self.scan_from;
        match memmem::find(&self.buffer[start..], BODY_TERMINATOR) {
            Some(offset) => {
                let end = start + offset;
                let body = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
                self.buffer.drain(..end + BODY_TERMINATOR.len());
                self.scan_from = 0;
                Some(Frame::Body(body))
            }
            None => {
                self.scan_from = self
                    .buffer
                    .len()
                    .saturating_sub(BODY_TERMINATOR.len() - 1);
                None
            }
        }
    }
}
