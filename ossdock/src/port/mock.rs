//! Scripted in-memory port used by the unit tests.
//!
//! Every complete line written to the port releases the next queued reply
//! into the receive buffer, which mirrors the device answering a command.

use {
    crate::{error::Result, port::Port},
    std::{
        collections::VecDeque,
        io::{self, Read, Write},
        sync::{Arc, Mutex},
        thread,
        time::Duration,
    },
};

pub(crate) struct MockPort {
    name: String,
    timeout: Duration,
    rx: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    line_buf: Vec<u8>,
    written: Arc<Mutex<Vec<String>>>,
    chunk: usize,
    fail_after: Option<usize>,
    delivered: usize,
    sleep_on_timeout: bool,
    closed: bool,
}

impl MockPort {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            timeout: Duration::from_millis(20),
            rx: VecDeque::new(),
            replies: VecDeque::new(),
            line_buf: Vec::new(),
            written: Arc::new(Mutex::new(Vec::new())),
            chunk: usize::MAX,
            fail_after: None,
            delivered: 0,
            sleep_on_timeout: false,
            closed: false,
        }
    }

    /// Queue raw reply bytes released by the next written line.
    pub(crate) fn reply(mut self, bytes: &[u8]) -> Self {
        self.replies.push_back(bytes.to_vec());
        self
    }

    /// Queue a reply made of CRLF-terminated lines.
    pub(crate) fn reply_lines(self, lines: &[&str]) -> Self {
        let mut bytes = Vec::new();
        for line in lines {
            bytes.extend_from_slice(line.as_bytes());
            bytes.extend_from_slice(b"\r\n");
        }
        self.reply(&bytes)
    }

    /// Bytes that are already waiting before anything is written.
    pub(crate) fn unsolicited(mut self, bytes: &[u8]) -> Self {
        self.rx.extend(bytes.iter().copied());
        self
    }

    /// Deliver at most `n` bytes per read.
    pub(crate) fn chunk_size(mut self, n: usize) -> Self {
        self.chunk = n.max(1);
        self
    }

    /// Fail every read once `n` bytes have been delivered.
    pub(crate) fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Block for the full timeout on empty reads, like a real port.
    pub(crate) fn blocking(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.sleep_on_timeout = true;
        self
    }

    pub(crate) fn written(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.written)
    }

    fn remaining_before_failure(&self) -> Option<usize> {
        self.fail_after
            .map(|limit| limit.saturating_sub(self.delivered))
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if self.remaining_before_failure() == Some(0) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        if self.rx.is_empty() {
            if self.sleep_on_timeout {
                thread::sleep(self.timeout);
            }
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }

        let mut n = buf.len().min(self.chunk).min(self.rx.len());
        if let Some(remaining) = self.remaining_before_failure() {
            n = n.min(remaining);
        }
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        self.delivered += n;
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        for &byte in buf {
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&self.line_buf)
                    .trim_end_matches('\r')
                    .to_string();
                self.line_buf.clear();
                if let Ok(mut written) = self.written.lock() {
                    written.push(line);
                }
                if let Some(reply) = self.replies.pop_front() {
                    self.rx.extend(reply);
                }
            } else {
                self.line_buf.push(byte);
            }
        }
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

    fn bytes_available(&mut self) -> Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed").into());
        }
        let mut n = self.rx.len().min(self.chunk);
        if let Some(remaining) = self.remaining_before_failure() {
            if remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged").into());
            }
            n = n.min(remaining);
        }
        Ok(n)
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.rx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
