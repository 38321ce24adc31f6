//! In-memory ports for protocol tests.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

/// Scripted reply to one read.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Reply {
    /// Deliver one byte.
    Byte(u8),
    /// Time out without data.
    Timeout,
    /// Fail with a broken pipe.
    Fail,
}

/// Mock serial port with separate read script and write log.
///
/// Unlike `Cursor<Vec<u8>>`, this keeps reads and writes independent.
pub(crate) struct MockPort {
    replies: VecDeque<Reply>,
    /// One entry per `write` call.
    pub(crate) writes: Vec<Vec<u8>>,
    /// Fail the n-th `write` call (0-based).
    pub(crate) fail_write_at: Option<usize>,
    /// Fail every `clear_buffers` call.
    pub(crate) fail_clear: bool,
    pub(crate) timeout: Duration,
    pub(crate) clears: usize,
    pub(crate) closed: bool,
}

impl MockPort {
    pub(crate) fn new(replies: &[Reply]) -> Self {
        Self {
            replies: replies.iter().copied().collect(),
            writes: Vec::new(),
            fail_write_at: None,
            fail_clear: false,
            timeout: Duration::ZERO,
            clears: 0,
            closed: false,
        }
    }

    /// Port that acknowledges every block.
    pub(crate) fn acking(blocks: usize) -> Self {
        Self::new(&vec![Reply::Byte(b'V'); blocks])
    }
}

impl io::Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.replies.pop_front() {
            Some(Reply::Byte(b)) if !buf.is_empty() => {
                buf[0] = b;
                Ok(1)
            },
            Some(Reply::Fail) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
            _ => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
        }
    }
}

impl io::Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_write_at == Some(self.writes.len()) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
        }
        self.writes.push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if self.fail_clear {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged").into());
        }
        self.clears += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
