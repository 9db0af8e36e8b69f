//! Line-oriented duplex channel over one serial port.
//!
//! Requests go out as `text\n`. Incoming bytes are buffered so that a
//! response header and the raw bulk stream following it can be consumed by
//! different readers without losing bytes in between.

use {
    crate::{
        error::{Error, Result},
        port::Port,
        protocol::{Response, SETTLE_DELAY},
    },
    log::trace,
    std::{io::ErrorKind, thread, time::Duration},
};

/// Read buffer size for line reads.
const LINE_CHUNK: usize = 256;

/// Behaviour of a [`Transport`] on top of the port settings.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Pause after each written line so the device can start answering.
    pub settle_delay: Duration,
    /// Consecutive silent reads (each one a full port timeout) after which a
    /// response read gives up.
    pub max_silent_reads: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            settle_delay: SETTLE_DELAY,
            max_silent_reads: 3,
        }
    }
}

impl LinkConfig {
    /// Set the post-write settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the silent-read bound for responses.
    #[must_use]
    pub fn with_max_silent_reads(mut self, reads: u32) -> Self {
        self.max_silent_reads = reads.max(1);
        self
    }
}

enum LineRead {
    Line(String),
    TimedOut(String),
}

/// Line framing over a [`Port`].
pub struct Transport<P: Port> {
    port: P,
    pending: Vec<u8>,
    config: LinkConfig,
}

impl<P: Port> Transport<P> {
    /// Wrap an opened port with default link settings.
    pub fn new(port: P) -> Self {
        Self::with_config(port, LinkConfig::default())
    }

    /// Wrap an opened port.
    pub fn with_config(port: P, config: LinkConfig) -> Self {
        Self {
            port,
            pending: Vec::new(),
            config,
        }
    }

    /// Port name/path.
    pub fn name(&self) -> &str {
        self.port
            .name()
    }

    /// Link settings.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Send one line, then wait for the settle delay.
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        trace!("{} <- {text}", self.port.name());
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        self.port
            .write_all_bytes(line.as_bytes())?;
        if !self
            .config
            .settle_delay
            .is_zero()
        {
            thread::sleep(self.config.settle_delay);
        }
        Ok(())
    }

    /// Read one line, without its terminator and surrounding whitespace.
    ///
    /// When the port timeout expires first, whatever arrived so far is
    /// returned, usually an empty string. Only hard I/O failures are errors.
    pub fn read_line(&mut self) -> Result<String> {
        match self.next_line()? {
            LineRead::Line(line) | LineRead::TimedOut(line) => Ok(line),
        }
    }

    fn next_line(&mut self) -> Result<LineRead> {
        let mut buf = [0u8; LINE_CHUNK];
        loop {
            if let Some(pos) = self
                .pending
                .iter()
                .position(|&b| b == b'\n')
            {
                let raw: Vec<u8> = self
                    .pending
                    .drain(..=pos)
                    .collect();
                let line = decode_line(&raw);
                trace!("{} -> {line}", self.port.name());
                return Ok(LineRead::Line(line));
            }

            match self
                .port
                .read(&mut buf)
            {
                Ok(n) if n > 0 => self
                    .pending
                    .extend_from_slice(&buf[..n]),
                Ok(_) => return Ok(self.take_partial()),
                Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(self.take_partial()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    fn take_partial(&mut self) -> LineRead {
        let raw = std::mem::take(&mut self.pending);
        let line = decode_line(&raw);
        trace!("{} -> (timeout) {line:?}", self.port.name());
        LineRead::TimedOut(line)
    }

    /// Read lines until one is `OK` or contains `ERR`.
    ///
    /// Every line read is kept, including empty ones. After
    /// [`LinkConfig::max_silent_reads`] consecutive timeouts with nothing
    /// received the read fails with [`Error::Timeout`].
    pub fn read_response(&mut self) -> Result<Response> {
        let mut response = Response::default();
        let mut silent = 0u32;

        loop {
            let line = match self.next_line()? {
                LineRead::Line(line) => {
                    silent = 0;
                    line
                },
                LineRead::TimedOut(partial) => {
                    if partial.is_empty() {
                        silent += 1;
                    } else {
                        silent = 0;
                    }
                    partial
                },
            };

            if response.push(line) {
                return Ok(response);
            }

            if silent
                >= self
                    .config
                    .max_silent_reads
                    .max(1)
            {
                return Err(Error::Timeout(format!(
                    "no terminal line from {} after {silent} silent reads ({} lines received)",
                    self.port.name(),
                    response
                        .lines()
                        .len()
                        - silent as usize
                )));
            }
        }
    }

    /// Read exactly `count` lines, whatever they contain.
    ///
    /// For replies laid out by position, where a field may itself look like
    /// a terminal line. Timeouts with nothing received do not count as
    /// lines; [`LinkConfig::max_silent_reads`] of them in a row fail with
    /// [`Error::Timeout`].
    pub fn read_lines(&mut self, count: usize) -> Result<Vec<String>> {
        let mut lines = Vec::with_capacity(count);
        let mut silent = 0u32;

        while lines.len() < count {
            match self.next_line()? {
                LineRead::Line(line) => lines.push(line),
                LineRead::TimedOut(partial) if !partial.is_empty() => lines.push(partial),
                LineRead::TimedOut(_) => {
                    silent += 1;
                    if silent
                        >= self
                            .config
                            .max_silent_reads
                            .max(1)
                    {
                        return Err(Error::Timeout(format!(
                            "{} sent {} of {count} lines",
                            self.port.name(),
                            lines.len()
                        )));
                    }
                    continue;
                },
            }
            silent = 0;
        }
        Ok(lines)
    }

    /// Bytes ready to read without blocking. Zero means nothing is waiting.
    ///
    /// While line reads have left bytes buffered, only those are counted
    /// and the port is not queried.
    pub fn bytes_available(&mut self) -> Result<usize> {
        if !self
            .pending
            .is_empty()
        {
            return Ok(self.pending.len());
        }
        self.port
            .bytes_available()
    }

    /// Drain what is currently available in one go, buffered bytes first.
    pub fn read_available(&mut self) -> Result<Vec<u8>> {
        if !self
            .pending
            .is_empty()
        {
            return Ok(std::mem::take(&mut self.pending));
        }
        let waiting = self
            .port
            .bytes_available()?;
        let mut out = vec![0u8; waiting];
        if waiting > 0 {
            match self
                .port
                .read(&mut out)
            {
                Ok(n) => out.truncate(n),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                    out.clear();
                },
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(out)
    }

    /// Read and drop everything already waiting; returns the byte count.
    pub fn discard_input(&mut self) -> Result<usize> {
        let mut total = 0;
        loop {
            let chunk = self.read_available()?;
            if chunk.is_empty() {
                break;
            }
            total += chunk.len();
        }
        if total > 0 {
            trace!("{}: discarded {total} unsolicited bytes", self.port.name());
        }
        Ok(total)
    }

    /// Close the underlying port.
    pub fn close(&mut self) -> Result<()> {
        self.pending
            .clear();
        self.port
            .close()
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{LinkConfig, Transport};
    use crate::error::Result;
    use crate::port::{NativePort, SerialConfig};

    impl Transport<NativePort> {
        /// Open a serial port and wrap it.
        pub fn open(serial: &SerialConfig, link: LinkConfig) -> Result<Self> {
            let port = NativePort::open(serial)?;
            Ok(Self::with_config(port, link))
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;

    fn fast() -> LinkConfig {
        LinkConfig::default().with_settle_delay(Duration::ZERO)
    }

    #[test]
    fn test_write_line_appends_terminator() {
        let port = MockPort::new("mock0");
        let written = port.written();
        let mut t = Transport::with_config(port, fast());

        t.write_line("08_Lab1").unwrap();
        t.write_line("07").unwrap();

        assert_eq!(*written.lock().unwrap(), vec!["08_Lab1", "07"]);
    }

    #[test]
    fn test_read_line_strips_whitespace() {
        let port = MockPort::new("mock0").unsolicited(b"  DATA \r\nLab1\n");
        let mut t = Transport::with_config(port, fast());

        assert_eq!(t.read_line().unwrap(), "DATA");
        assert_eq!(t.read_line().unwrap(), "Lab1");
    }

    #[test]
    fn test_read_line_timeout_returns_empty() {
        let mut t = Transport::with_config(MockPort::new("mock0"), fast());
        assert_eq!(t.read_line().unwrap(), "");
    }

    #[test]
    fn test_read_line_timeout_returns_partial() {
        let port = MockPort::new("mock0").unsolicited(b"half a li");
        let mut t = Transport::with_config(port, fast());
        assert_eq!(t.read_line().unwrap(), "half a li");
        assert_eq!(t.read_line().unwrap(), "");
    }

    #[test]
    fn test_read_line_across_small_chunks() {
        let port = MockPort::new("mock0")
            .unsolicited(b"60000\r\n1\r\n")
            .chunk_size(3);
        let mut t = Transport::with_config(port, fast());
        assert_eq!(t.read_line().unwrap(), "60000");
        assert_eq!(t.read_line().unwrap(), "1");
    }

    #[test]
    fn test_read_response_collects_until_terminal() {
        let port = MockPort::new("mock0").reply_lines(&["", "Name set", "OK", "stray"]);
        let mut t = Transport::with_config(port, fast());

        t.write_line("08_Lab1").unwrap();
        let response = t.read_response().unwrap();
        assert_eq!(response.lines(), ["", "Name set", "OK"]);
        assert!(response.is_ok());

        // The stray line stays buffered for the next reader
        assert_eq!(t.read_line().unwrap(), "stray");
    }

    #[test]
    fn test_read_response_error_terminal() {
        let port = MockPort::new("mock0").reply_lines(&["ERR: bad interval"]);
        let mut t = Transport::with_config(port, fast());
        t.write_line("04_5").unwrap();
        let response = t.read_response().unwrap();
        assert!(response.is_err());
        assert_eq!(response.lines().len(), 1);
    }

    #[test]
    fn test_read_response_bounded_on_silence() {
        let port = MockPort::new("mock0").reply_lines(&["DATA", "Lab1"]);
        let mut t = Transport::with_config(port, fast().with_max_silent_reads(2));
        t.write_line("09").unwrap();

        match t.read_response() {
            Err(Error::Timeout(msg)) => assert!(msg.contains("2 lines received"), "{msg}"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_read_lines_ignores_terminal_lookalikes() {
        let port = MockPort::new("mock0").reply_lines(&["Jerry", "ok", "ERRAND", "stray"]);
        let mut t = Transport::with_config(port, fast());
        t.write_line("07").unwrap();

        assert_eq!(t.read_lines(3).unwrap(), ["Jerry", "ok", "ERRAND"]);
        assert_eq!(t.read_line().unwrap(), "stray");
    }

    #[test]
    fn test_read_lines_bounded_on_silence() {
        let port = MockPort::new("mock0").reply_lines(&["Lab1", ""]);
        let mut t = Transport::with_config(port, fast().with_max_silent_reads(2));
        t.write_line("07").unwrap();

        match t.read_lines(5) {
            Err(Error::Timeout(msg)) => assert!(msg.contains("2 of 5"), "{msg}"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_read_available_includes_buffered_bytes() {
        let port = MockPort::new("mock0").unsolicited(b"DATA\r\n12\r\npayload");
        let mut t = Transport::with_config(port, fast());

        assert_eq!(t.read_line().unwrap(), "DATA");
        assert_eq!(t.read_line().unwrap(), "12");
        assert_eq!(t.bytes_available().unwrap(), 7);
        assert_eq!(t.read_available().unwrap(), b"payload");
        assert_eq!(t.bytes_available().unwrap(), 0);
        assert!(t.read_available().unwrap().is_empty());
    }

    #[test]
    fn test_discard_input() {
        let port = MockPort::new("mock0")
            .unsolicited(b"boot banner\r\nv1.2\r\n")
            .chunk_size(4);
        let mut t = Transport::with_config(port, fast());
        assert_eq!(t.discard_input().unwrap(), 19);
        assert_eq!(t.bytes_available().unwrap(), 0);
    }

    #[test]
    fn test_hard_io_error_surfaces() {
        let port = MockPort::new("mock0")
            .unsolicited(b"DA")
            .fail_after(2);
        let mut t = Transport::with_config(port, fast());
        assert!(matches!(t.read_line(), Err(Error::Io(_))));
    }

    #[test]
    fn test_close_stops_io() {
        let mut t = Transport::with_config(MockPort::new("mock0"), fast());
        t.close().unwrap();
        assert!(t.write_line("07").is_err());
    }
}
