//! Bulk transfers: full export and incremental sync.
//!
//! Both flows answer with a `DATA` line, a decimal byte count, then the raw
//! payload followed by `OK`:
//!
//! ```text
//! -> 02                  (export)      -> 15_<local bytes>   (sync)
//! <- DATA
//! <- <size>              size -1 on sync: local and device diverged
//! <- <size bytes ...>OK
//! ```
//!
//! A started [`Transfer`] is an iterator of [`TransferEvent`]s. It borrows
//! the session mutably, so no other command can interleave with the stream,
//! and it ends after the first `Complete` or error.

use {
    crate::{
        error::{Error, Result},
        port::Port,
        protocol::{Command, DATA_HEADER, Opcode, SYNC_MISMATCH_SIZE, TERMINAL_MARKER},
        session::DeviceSession,
        transport::Transport,
    },
    log::{debug, info, trace, warn},
    std::{
        io::Write,
        thread,
        time::{Duration, Instant},
    },
};

/// Sleep between checks while no bytes are waiting.
pub const TRANSFER_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Longest silence tolerated in the middle of a transfer.
pub const TRANSFER_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Payload bytes remembered for diagnosing a stream that ends early.
const RECENT_BYTES: usize = 8;

/// Bulk transfer settings.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Sleep between checks while no bytes are waiting.
    pub poll_interval: Duration,
    /// Abort once nothing arrived for this long.
    pub idle_timeout: Duration,
    /// Polled on every loop iteration; `true` aborts the transfer.
    pub interrupted: fn() -> bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            poll_interval: TRANSFER_POLL_INTERVAL,
            idle_timeout: TRANSFER_IDLE_TIMEOUT,
            interrupted: crate::is_interrupted_requested,
        }
    }
}

impl TransferConfig {
    /// Set the idle bound.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

/// Which flow a transfer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Every stored datapoint.
    Export,
    /// Only what the device holds beyond `local_bytes`.
    Sync {
        /// Bytes already held locally.
        local_bytes: u64,
    },
}

/// Something that happened during a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    /// Bytes arrived.
    Progress {
        /// Payload bytes received so far.
        received: u64,
        /// Payload bytes announced by the device.
        expected: u64,
        /// `received` as a whole percentage of `expected`.
        percent: u8,
    },
    /// The terminal marker arrived after the full payload; the sink is
    /// flushed.
    Complete {
        /// Payload bytes written to the sink.
        bytes: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Reading,
    Finishing,
    Done,
}

enum Trailer {
    Complete,
    Pending,
    Unexpected,
}

/// A running bulk transfer.
pub struct Transfer<'s, P: Port, W: Write> {
    session: &'s mut DeviceSession<P>,
    sink: W,
    config: TransferConfig,
    kind: TransferKind,
    expected: u64,
    received: u64,
    recent: Vec<u8>,
    trailer: Vec<u8>,
    last_activity: Instant,
    state: State,
}

/// Request every stored datapoint.
pub fn start_export<P: Port, W: Write>(
    session: &mut DeviceSession<P>,
    sink: W,
    config: TransferConfig,
) -> Result<Transfer<'_, P, W>> {
    Transfer::start(session, TransferKind::Export, sink, config)
}

/// Request what the device holds beyond the `local_bytes` already synced.
pub fn start_sync<P: Port, W: Write>(
    session: &mut DeviceSession<P>,
    local_bytes: u64,
    sink: W,
    config: TransferConfig,
) -> Result<Transfer<'_, P, W>> {
    Transfer::start(session, TransferKind::Sync { local_bytes }, sink, config)
}

impl<'s, P: Port, W: Write> Transfer<'s, P, W> {
    /// Send the request and read the size header.
    ///
    /// Header failures leave the session usable. A declared size of `0`
    /// yields [`Error::EmptyTransfer`], `-1` on sync yields
    /// [`Error::SyncMismatch`]; nothing is written to the sink in either case.
    pub fn start(
        session: &'s mut DeviceSession<P>,
        kind: TransferKind,
        sink: W,
        config: TransferConfig,
    ) -> Result<Self> {
        let command = match kind {
            TransferKind::Export => Command::bare(Opcode::ExportAll)?,
            TransferKind::Sync { local_bytes } => {
                Command::new(Opcode::SyncDatapoints, [local_bytes.to_string()])?
            },
        };

        let transport = session.transport_mut();
        transport.write_line(&command.encode())?;
        let expected = match read_size_header(transport, kind) {
            Ok(size) => size,
            Err(e) => {
                debug!("{}: transfer refused: {e}", transport.name());
                if !e.is_fatal() {
                    let _ = transport.discard_input();
                }
                return Err(e);
            },
        };
        info!(
            "{}: receiving {expected} bytes ({kind:?})",
            transport.name()
        );

        Ok(Self {
            session,
            sink,
            config,
            kind,
            expected,
            received: 0,
            recent: Vec::with_capacity(RECENT_BYTES),
            trailer: Vec::new(),
            last_activity: Instant::now(),
            state: State::Reading,
        })
    }

    /// Which flow this is.
    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    /// Payload size announced by the device.
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Payload bytes written to the sink so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Drive the transfer to the end, reporting progress to `on_progress`.
    ///
    /// Returns the payload byte count.
    pub fn run<F>(mut self, mut on_progress: F) -> Result<u64>
    where
        F: FnMut(u64, u64, u8),
    {
        for event in self.by_ref() {
            match event? {
                TransferEvent::Progress {
                    received,
                    expected,
                    percent,
                } => on_progress(received, expected, percent),
                TransferEvent::Complete { bytes } => return Ok(bytes),
            }
        }
        Err(Error::Protocol("transfer ended without completing".to_string()))
    }

    fn transport(&mut self) -> &mut Transport<P> {
        self.session
            .transport_mut()
    }

    fn progress(&self) -> TransferEvent {
        let percent = (self.received * 100)
            .checked_div(self.expected)
            .unwrap_or(100)
            .min(100);
        TransferEvent::Progress {
            received: self.received,
            expected: self.expected,
            percent: u8::try_from(percent).unwrap_or(100),
        }
    }

    fn step(&mut self) -> Result<TransferEvent> {
        if self.state == State::Finishing {
            return self.finish();
        }

        loop {
            if (self.config.interrupted)() {
                return Err(self.abort(Error::Interrupted));
            }

            let waiting = match self
                .transport()
                .bytes_available()
            {
                Ok(n) => n,
                Err(e) => return Err(self.abort(e)),
            };
            if waiting == 0 {
                if self
                    .last_activity
                    .elapsed()
                    >= self.config.idle_timeout
                {
                    let e = self.idle_error();
                    return Err(self.abort(e));
                }
                thread::sleep(self.config.poll_interval);
                continue;
            }

            let chunk = match self
                .transport()
                .read_available()
            {
                Ok(chunk) => chunk,
                Err(e) => return Err(self.abort(e)),
            };
            if chunk.is_empty() {
                continue;
            }
            self.last_activity = Instant::now();
            trace!("chunk of {} bytes", chunk.len());

            if let Err(e) = self.accept(&chunk) {
                return Err(self.abort(e));
            }

            if self.received == self.expected {
                match classify_trailer(&self.trailer) {
                    Trailer::Complete => self.state = State::Finishing,
                    Trailer::Pending => {},
                    Trailer::Unexpected => {
                        let e = Error::Protocol(format!(
                            "{} unexpected bytes after the declared {} byte payload",
                            self.trailer.len(),
                            self.expected
                        ));
                        return Err(self.abort(e));
                    },
                }
            }
            return Ok(self.progress());
        }
    }

    /// Write the payload part of `chunk` to the sink and keep the rest as
    /// trailer.
    fn accept(&mut self, chunk: &[u8]) -> Result<()> {
        let room = usize::try_from(self.expected - self.received).unwrap_or(usize::MAX);
        let (payload, rest) = chunk.split_at(room.min(chunk.len()));

        if !payload.is_empty() {
            self.sink
                .write_all(payload)?;
            self.received += payload.len() as u64;
            self.recent
                .extend_from_slice(payload);
            let excess = self
                .recent
                .len()
                .saturating_sub(RECENT_BYTES);
            if excess > 0 {
                self.recent = self
                    .recent
                    .split_off(excess);
            }
        }
        self.trailer
            .extend_from_slice(rest);
        Ok(())
    }

    fn finish(&mut self) -> Result<TransferEvent> {
        if let Err(e) = self.sink.flush() {
            return Err(self.abort(Error::Io(e)));
        }
        self.state = State::Done;
        let _ = self
            .transport()
            .discard_input();
        info!("Transfer complete: {} bytes", self.received);
        Ok(TransferEvent::Complete {
            bytes: self.received,
        })
    }

    fn idle_error(&self) -> Error {
        if self
            .recent
            .trim_ascii_end()
            .ends_with(TERMINAL_MARKER)
        {
            Error::Protocol(format!(
                "stream ended after {} of {} bytes",
                self.received, self.expected
            ))
        } else {
            Error::Timeout(format!(
                "no data for {:?} after {} of {} bytes",
                self.config.idle_timeout, self.received, self.expected
            ))
        }
    }

    fn abort(&mut self, source: Error) -> Error {
        self.state = State::Done;
        warn!(
            "Transfer aborted after {} of {} bytes: {source}",
            self.received, self.expected
        );
        if !source.is_fatal() {
            let _ = self
                .transport()
                .discard_input();
        }
        Error::TransferAborted {
            received: self.received,
            source: Box::new(source),
        }
    }
}

impl<P: Port, W: Write> Iterator for Transfer<'_, P, W> {
    type Item = Result<TransferEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == State::Done {
            return None;
        }
        Some(self.step())
    }
}

impl<P: Port, W: Write> std::iter::FusedIterator for Transfer<'_, P, W> {}

impl<P: Port, W: Write> Drop for Transfer<'_, P, W> {
    fn drop(&mut self) {
        if self.state != State::Done {
            warn!(
                "Transfer abandoned after {} of {} bytes",
                self.received, self.expected
            );
            let _ = self
                .transport()
                .discard_input();
        }
    }
}

fn read_size_header<P: Port>(transport: &mut Transport<P>, kind: TransferKind) -> Result<u64> {
    let header = transport.read_line()?;
    if header.is_empty() {
        return Err(Error::Timeout(format!(
            "no answer to the {DATA_HEADER} request"
        )));
    }
    if !header.eq_ignore_ascii_case(DATA_HEADER) {
        return Err(Error::Protocol(format!(
            "expected {DATA_HEADER} header, got {header:?}"
        )));
    }

    let size_line = transport.read_line()?;
    if size_line.is_empty() {
        return Err(Error::Timeout("no transfer size after header".to_string()));
    }
    let size: i64 = size_line
        .parse()
        .map_err(|_| Error::Protocol(format!("invalid transfer size {size_line:?}")))?;

    match size {
        SYNC_MISMATCH_SIZE if matches!(kind, TransferKind::Sync { .. }) => Err(Error::SyncMismatch),
        0 => Err(Error::EmptyTransfer),
        n => u64::try_from(n).map_err(|_| Error::Protocol(format!("negative transfer size {n}"))),
    }
}

fn classify_trailer(trailer: &[u8]) -> Trailer {
    let trimmed = trailer.trim_ascii();
    if trimmed == TERMINAL_MARKER {
        Trailer::Complete
    } else if TERMINAL_MARKER.starts_with(trimmed) {
        Trailer::Pending
    } else {
        Trailer::Unexpected
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{port::mock::MockPort, session::tests::connected},
    };

    fn config() -> TransferConfig {
        TransferConfig {
            poll_interval: Duration::from_millis(1),
            idle_timeout: Duration::from_millis(100),
            interrupted: || false,
        }
    }

    /// Port that answers the clock sync, then `reply` to the next request.
    fn device(reply: &[u8]) -> MockPort {
        MockPort::new("mock0")
            .reply_lines(&["OK"])
            .reply(reply)
    }

    fn aborted(result: Option<Result<TransferEvent>>) -> (u64, Error) {
        match result {
            Some(Err(Error::TransferAborted { received, source })) => (received, *source),
            other => panic!("expected an aborted transfer, got {other:?}"),
        }
    }

    #[test]
    fn test_export_completes_with_exact_size() {
        let port = device(b"DATA\r\n10\r\nrow1\nrow2\nOK").chunk_size(3);
        let written = port.written();
        let mut session = connected(port);
        let mut sink = Vec::new();

        let events: Vec<TransferEvent> = start_export(&mut session, &mut sink, config())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(events.last(), Some(&TransferEvent::Complete { bytes: 10 }));
        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Progress { percent, .. } => Some(*percent),
                TransferEvent::Complete { .. } => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert_eq!(percents.last(), Some(&100));
        assert_eq!(sink, b"row1\nrow2\n");
        assert_eq!(written.lock().unwrap()[1], "02");
    }

    #[test]
    fn test_marker_bytes_inside_payload_and_split_marker() {
        let port = device(b"DATA\r\n5\r\nOK\nOKOK\r\n").chunk_size(2);
        let mut session = connected(port);
        let mut sink = Vec::new();

        let bytes = start_export(&mut session, &mut sink, config())
            .unwrap()
            .run(|_, _, _| {})
            .unwrap();

        assert_eq!(bytes, 5);
        assert_eq!(sink, b"OK\nOK");
    }

    #[test]
    fn test_session_usable_after_transfer() {
        let port = MockPort::new("mock0")
            .reply_lines(&["OK"])
            .reply(b"DATA\r\n3\r\nabcOK\r\n")
            .reply_lines(&["OK"]);
        let mut session = connected(port);

        let mut sink = Vec::new();
        start_export(&mut session, &mut sink, config())
            .unwrap()
            .run(|_, _, _| {})
            .unwrap();
        assert!(session.erase_storage().is_ok());
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut session = connected(device(b"DATA\r\n0\r\nOK\r\n"));
        let mut sink = Vec::new();
        let result = start_export(&mut session, &mut sink, config());
        assert!(matches!(result, Err(Error::EmptyTransfer)));
        drop(result);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_bad_headers_rejected() {
        let replies: [&[u8]; 4] = [
            b"NOPE\r\n10\r\n",
            b"DATA\r\nlots\r\n",
            b"DATA\r\n-5\r\n",
            b"DATA\r\n-1\r\n",
        ];
        for reply in replies {
            let mut session = connected(device(reply));
            let result = start_export(&mut session, Vec::new(), config());
            assert!(matches!(result, Err(Error::Protocol(_))), "{reply:?}");
        }
    }

    #[test]
    fn test_silent_device_times_out_header() {
        let mut session = connected(MockPort::new("mock0").reply_lines(&["OK"]));
        let result = start_export(&mut session, Vec::new(), config());
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn test_sync_sends_local_size() {
        let port = device(b"DATA\r\n4\r\nrow\nOK");
        let written = port.written();
        let mut session = connected(port);
        let mut sink = Vec::new();

        let transfer = start_sync(&mut session, 1234, &mut sink, config()).unwrap();
        assert_eq!(transfer.kind(), TransferKind::Sync { local_bytes: 1234 });
        assert_eq!(transfer.expected(), 4);
        assert_eq!(transfer.run(|_, _, _| {}).unwrap(), 4);
        assert_eq!(sink, b"row\n");
        assert_eq!(written.lock().unwrap()[1], "15_1234");
    }

    #[test]
    fn test_sync_mismatch_writes_nothing() {
        let port = MockPort::new("mock0")
            .reply_lines(&["OK"])
            .reply(b"DATA\r\n-1\r\nOK\r\n")
            .reply_lines(&["OK"]);
        let mut session = connected(port);
        let mut sink = Vec::new();

        let result = start_sync(&mut session, 0, &mut sink, config());
        assert!(matches!(result, Err(Error::SyncMismatch)));
        drop(result);
        assert!(sink.is_empty());

        // The trailing OK was drained, so the next command gets its own answer
        let response = session
            .invoke("STOP_RECORDING", &[])
            .unwrap();
        assert_eq!(response.lines(), ["OK"]);
    }

    #[test]
    fn test_io_failure_reports_received_bytes() {
        let mut reply = b"DATA\r\n100\r\n".to_vec();
        reply.extend_from_slice(&[b'x'; 40]);
        // clock sync answer (4) + header (11) + 30 payload bytes
        let port = device(&reply).fail_after(45);
        let mut session = connected(port);
        let mut sink = Vec::new();

        let mut transfer = start_export(&mut session, &mut sink, config()).unwrap();
        assert_eq!(
            transfer.next().unwrap().unwrap(),
            TransferEvent::Progress {
                received: 30,
                expected: 100,
                percent: 30
            }
        );
        let (received, source) = aborted(transfer.next());
        assert_eq!(received, 30);
        assert!(matches!(source, Error::Io(_)));
        assert!(transfer.next().is_none());
        drop(transfer);
        assert_eq!(sink.len(), 30);
    }

    #[test]
    fn test_idle_timeout_aborts() {
        let mut session = connected(device(b"DATA\r\n10\r\nabcde"));
        let mut transfer = start_export(&mut session, Vec::new(), config()).unwrap();

        assert!(matches!(transfer.next(), Some(Ok(TransferEvent::Progress { received: 5, .. }))));
        let (received, source) = aborted(transfer.next());
        assert_eq!(received, 5);
        assert!(matches!(source, Error::Timeout(_)));
    }

    #[test]
    fn test_short_stream_is_protocol_error() {
        let mut session = connected(device(b"DATA\r\n10\r\nabcOK"));
        let transfer = start_export(&mut session, Vec::new(), config()).unwrap();

        let err = transfer
            .run(|_, _, _| {})
            .unwrap_err();
        match err {
            Error::TransferAborted { received, source } => {
                assert_eq!(received, 5);
                assert!(source.to_string().contains("5 of 10"), "{source}");
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_oversize_stream_is_protocol_error() {
        let mut session = connected(device(b"DATA\r\n3\r\nabcdefOK"));
        let mut sink = Vec::new();
        let result = start_export(&mut session, &mut sink, config())
            .unwrap()
            .run(|_, _, _| {});

        match result {
            Err(Error::TransferAborted { received, source }) => {
                assert_eq!(received, 3);
                assert!(matches!(*source, Error::Protocol(_)));
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_interrupt_aborts() {
        let mut session = connected(device(b"DATA\r\n10\r\n0123456789OK"));
        let cfg = TransferConfig {
            interrupted: || true,
            ..config()
        };
        let mut transfer = start_export(&mut session, Vec::new(), cfg).unwrap();

        let (received, source) = aborted(transfer.next());
        assert_eq!(received, 0);
        assert!(matches!(source, Error::Interrupted));
        assert!(transfer.next().is_none());
    }

    #[test]
    fn test_progress_callback() {
        let mut session = connected(device(b"DATA\r\n8\r\n12345678OK").chunk_size(4));
        let mut seen = Vec::new();
        let bytes = start_export(&mut session, Vec::new(), config())
            .unwrap()
            .run(|received, expected, percent| seen.push((received, expected, percent)))
            .unwrap();

        assert_eq!(bytes, 8);
        assert_eq!(seen.last(), Some(&(8, 8, 100)));
        assert!(seen.iter().all(|(_, expected, _)| *expected == 8));
    }
}
