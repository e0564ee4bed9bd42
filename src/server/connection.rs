//! Per-Connection State Machine
//!
//! One `Connection` owns a client socket's two fixed buffers and drives the
//! read -> dispatch -> write -> read cycle from readiness events. The
//! selector thread hands it one event at a time; each event is one bounded
//! step of work (a partial read or partial write, plus at most one handler
//! invocation), so one slow peer can never starve the others.
//!
//! ## Modes and the Interest Set
//!
//! ```text
//!            readable: accumulate, frame
//!          ┌─────────────────────────────┐
//!          ▼                             │
//!      ┌─────────┐  complete frame   ┌─────────┐
//!      │ Reading │ ────────────────> │ Writing │<─┐
//!      └─────────┘   handle, flip    └─────────┘  │ writable:
//!          │                           │   │      │ partial drain
//!          │ EOF / malformed /         │   └──────┘
//!          │ oversize / handler error  │ fully drained:
//!          ▼                           │ next frame or back to Reading
//!      ┌─────────┐ <───────────────────┘
//!      │ Closed  │
//!      └─────────┘
//! ```
//!
//! While open, the connection is registered for exactly one of READ or
//! WRITE - [`interest`](Connection::interest) is derived from the mode, so
//! the two cannot drift apart.
//!
//! A connection is request/response serial: the output buffer holds at most
//! one response, and a pipelined next request waits in the input buffer
//! until that response has fully drained.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use mio::Interest;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::buffer::ByteBuffer;
use crate::protocol::{FrameOutcome, HandlerError, RequestHandler, WireReader, WireWriter};

/// Fixed size of each connection's input and output buffer. A request or
/// response that does not fit is a protocol violation.
pub const CONNECTION_BUFFER_SIZE: usize = 64_000;

/// What the connection is currently waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Accumulating request bytes; interested in READ.
    Reading,
    /// Draining a response; interested in WRITE.
    Writing,
    /// Finished; the socket should be deregistered and dropped.
    Closed,
}

/// Why a connection left the open states.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer shut its end down; not an error worth logging loudly.
    #[error("peer closed the connection")]
    PeerClosed,

    /// A socket-level failure.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    /// The framer saw bytes that cannot be a request.
    #[error("malformed request frame")]
    MalformedFrame,

    /// A request outgrew the input buffer.
    #[error("request exceeds the {0}-byte input buffer")]
    Oversize(usize),

    /// The handler hit a corrupt frame or an unknown opcode.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// The per-connection state machine. The transport is passed per event and
/// only needs `Read + Write`, so tests can script partial reads, partial
/// writes, and EOF without a socket.
pub struct Connection {
    handler: Arc<dyn RequestHandler>,
    peer: SocketAddr,
    input: ByteBuffer,
    output: ByteBuffer,
    mode: Mode,
}

impl Connection {
    /// A fresh connection in Reading mode with empty buffers.
    pub fn new(handler: Arc<dyn RequestHandler>, peer: SocketAddr) -> Self {
        Self::with_buffer_size(handler, peer, CONNECTION_BUFFER_SIZE)
    }

    fn with_buffer_size(handler: Arc<dyn RequestHandler>, peer: SocketAddr, size: usize) -> Self {
        Self {
            handler,
            peer,
            input: ByteBuffer::with_capacity(size),
            output: ByteBuffer::with_capacity(size),
            mode: Mode::Reading,
        }
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The one readiness interest this connection should be registered
    /// for, `None` once closed. Derived from the mode: READ iff Reading,
    /// WRITE iff Writing.
    pub fn interest(&self) -> Option<Interest> {
        match self.mode {
            Mode::Reading => Some(Interest::READABLE),
            Mode::Writing => Some(Interest::WRITABLE),
            Mode::Closed => None,
        }
    }

    /// Dispatches one readiness event and reports the resulting mode.
    ///
    /// Errors are terminal: they are logged at a severity matching their
    /// kind and the connection moves to Closed. Events that do not match
    /// the current mode (stale readiness after a re-registration) are
    /// ignored.
    pub fn on_event<T: Read + Write>(
        &mut self,
        transport: &mut T,
        readable: bool,
        writable: bool,
    ) -> Mode {
        let result = match self.mode {
            Mode::Reading if readable => self.on_readable(transport),
            Mode::Writing if writable => self.on_writable(transport),
            Mode::Closed => return Mode::Closed,
            _ => Ok(()),
        };

        if let Err(error) = result {
            match &error {
                ConnectionError::PeerClosed => {
                    trace!(client = %self.peer, "connection closed by peer")
                }
                ConnectionError::Io(e) => {
                    debug!(client = %self.peer, error = %e, "connection I/O error")
                }
                _ => warn!(client = %self.peer, error = %error, "closing connection"),
            }
            self.mode = Mode::Closed;
        }
        self.mode
    }

    /// Reading mode, socket readable: pull everything available into the
    /// input buffer, then try to dispatch a complete request.
    ///
    /// EOF seen while draining does not short-circuit the dispatch: the
    /// peer may have written a full request and closed its end in one go,
    /// and that request still gets its response. The connection only
    /// closes on EOF when the buffered bytes hold no complete frame.
    fn on_readable<T: Read>(&mut self, transport: &mut T) -> Result<(), ConnectionError> {
        let mut peer_eof = false;
        loop {
            if self.input.remaining_capacity() == 0 {
                break;
            }
            match transport.read(self.input.unfilled()) {
                Ok(0) => {
                    peer_eof = true;
                    break;
                }
                Ok(n) => self.input.advance_filled(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.try_dispatch()?;
        if peer_eof && self.mode == Mode::Reading {
            return Err(ConnectionError::PeerClosed);
        }
        Ok(())
    }

    /// Writing mode, socket writable: drain what the OS will take. On a
    /// full drain, a pipelined next request may already be buffered, so
    /// try to dispatch before falling back to Reading.
    fn on_writable<T: Write>(&mut self, transport: &mut T) -> Result<(), ConnectionError> {
        while !self.output.is_drained() {
            match transport.write(self.output.filled()) {
                Ok(0) => return Err(ConnectionError::PeerClosed),
                Ok(n) => self.output.consume(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.try_dispatch()
    }

    /// Frames the buffered input. A complete request is handed to the
    /// handler (exactly the framed bytes, nothing more), its bytes are
    /// consumed, and the connection flips to Writing. Incomplete input
    /// leaves us Reading; bytes that cannot frame close the connection.
    fn try_dispatch(&mut self) -> Result<(), ConnectionError> {
        match self.handler.is_complete(self.input.filled()) {
            FrameOutcome::Complete(len) => {
                let frame = &self.input.filled()[..len];
                let mut reader = WireReader::new(frame);
                let mut writer = WireWriter::new(&mut self.output);
                self.handler.handle(&mut reader, &mut writer)?;
                trace!(client = %self.peer, frame_len = len, "request handled");

                self.input.consume(len);
                // Keep any pipelined tail; it is the next request's prefix.
                self.input.compact();
                self.mode = Mode::Writing;
                Ok(())
            }
            FrameOutcome::Incomplete => {
                if self.input.remaining_capacity() == 0 {
                    return Err(ConnectionError::Oversize(self.input.capacity()));
                }
                self.mode = Mode::Reading;
                Ok(())
            }
            FrameOutcome::Malformed => Err(ConnectionError::MalformedFrame),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::protocol::wire::opcode;
    use crate::protocol::NativeRequestHandler;
    use crate::store::{ErrorCodeMapper, MemoryStore, Store, StoreRepository};

    /// Scripted transport: reads pop from `incoming`, writes land in
    /// `outgoing` up to `write_quota` bytes per call. An exhausted script
    /// yields WouldBlock, like a drained non-blocking socket.
    #[derive(Default)]
    struct MockTransport {
        incoming: VecDeque<Vec<u8>>,
        outgoing: Vec<u8>,
        write_quota: Option<usize>,
        eof: bool,
    }

    impl Read for MockTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.incoming.pop_front() {
                Some(chunk) => {
                    assert!(buf.len() >= chunk.len(), "test chunk larger than buffer");
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None if self.eof => Ok(0),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for MockTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = self.write_quota.unwrap_or(buf.len()).min(buf.len());
            if n == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.outgoing.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn handler() -> Arc<dyn RequestHandler> {
        let repository = Arc::new(StoreRepository::new());
        repository.add_local(Arc::new(MemoryStore::new("s")) as Arc<dyn Store>);
        Arc::new(NativeRequestHandler::new(repository, ErrorCodeMapper::new()))
    }

    fn connection() -> Connection {
        Connection::new(handler(), "127.0.0.1:9".parse().unwrap())
    }

    fn get_request() -> Vec<u8> {
        vec![
            opcode::GET,
            0x00, 0x01, b's', // store name
            0x00, // not routed
            0x00, 0x00, 0x00, 0x03, b'k', b'e', b'y',
        ]
    }

    /// GET against the empty store "s": zero status, empty list.
    const GET_EMPTY_RESPONSE: [u8; 6] = [0, 0, 0, 0, 0, 0];

    fn assert_interest_matches_mode(conn: &Connection) {
        match conn.mode() {
            Mode::Reading => assert_eq!(conn.interest(), Some(Interest::READABLE)),
            Mode::Writing => assert_eq!(conn.interest(), Some(Interest::WRITABLE)),
            Mode::Closed => assert_eq!(conn.interest(), None),
        }
    }

    #[test]
    fn test_full_cycle_read_dispatch_write_read() {
        let mut conn = connection();
        let mut transport = MockTransport::default();
        transport.incoming.push_back(get_request());

        assert_eq!(conn.mode(), Mode::Reading);
        assert_interest_matches_mode(&conn);

        // Readable: the whole request arrives, gets handled, and the
        // connection turns around to drain the response.
        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Writing);
        assert_interest_matches_mode(&conn);

        // Writable: response drains in one go, back to Reading.
        assert_eq!(conn.on_event(&mut transport, false, true), Mode::Reading);
        assert_interest_matches_mode(&conn);
        assert_eq!(transport.outgoing, GET_EMPTY_RESPONSE);
    }

    #[test]
    fn test_request_split_across_reads() {
        let mut conn = connection();
        let request = get_request();
        let (first, second) = request.split_at(5);

        let mut transport = MockTransport::default();
        transport.incoming.push_back(first.to_vec());
        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Reading);

        transport.incoming.push_back(second.to_vec());
        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Writing);

        assert_eq!(conn.on_event(&mut transport, false, true), Mode::Reading);
        assert_eq!(transport.outgoing, GET_EMPTY_RESPONSE);
    }

    #[test]
    fn test_two_requests_in_one_segment_answered_in_order() {
        let mut conn = connection();
        let mut segment = get_request();
        segment.extend_from_slice(&get_request());

        let mut transport = MockTransport::default();
        transport.incoming.push_back(segment);

        // First frame dispatched; the second waits in the input buffer.
        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Writing);

        // Draining the first response immediately dispatches the buffered
        // second request - no further readable event will announce it.
        assert_eq!(conn.on_event(&mut transport, false, true), Mode::Writing);
        assert_eq!(conn.on_event(&mut transport, false, true), Mode::Reading);

        let mut expected = GET_EMPTY_RESPONSE.to_vec();
        expected.extend_from_slice(&GET_EMPTY_RESPONSE);
        assert_eq!(transport.outgoing, expected);
    }

    #[test]
    fn test_partial_writes_stay_in_writing_mode() {
        let mut conn = connection();
        let mut transport = MockTransport::default();
        transport.incoming.push_back(get_request());
        transport.write_quota = Some(2);

        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Writing);
        assert_eq!(conn.on_event(&mut transport, false, true), Mode::Writing);
        assert_eq!(conn.on_event(&mut transport, false, true), Mode::Writing);
        assert_eq!(conn.on_event(&mut transport, false, true), Mode::Reading);
        assert_eq!(transport.outgoing, GET_EMPTY_RESPONSE);
    }

    #[test]
    fn test_eof_closes() {
        let mut conn = connection();
        let mut transport = MockTransport {
            eof: true,
            ..Default::default()
        };
        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Closed);
        assert_eq!(conn.interest(), None);
    }

    #[test]
    fn test_request_then_eof_is_still_answered() {
        // The peer writes a full request and closes in one go; the FIN is
        // observed in the same readable event as the request bytes. The
        // request must still get its response.
        let mut conn = connection();
        let mut transport = MockTransport {
            eof: true,
            ..Default::default()
        };
        transport.incoming.push_back(get_request());

        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Writing);
        assert_eq!(conn.on_event(&mut transport, false, true), Mode::Reading);
        assert_eq!(transport.outgoing, GET_EMPTY_RESPONSE);

        // The next readable event sees only the EOF.
        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Closed);
    }

    #[test]
    fn test_pipelined_requests_then_eof_all_answered() {
        let mut conn = connection();
        let mut segment = get_request();
        segment.extend_from_slice(&get_request());
        let mut transport = MockTransport {
            eof: true,
            ..Default::default()
        };
        transport.incoming.push_back(segment);

        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Writing);
        assert_eq!(conn.on_event(&mut transport, false, true), Mode::Writing);
        assert_eq!(conn.on_event(&mut transport, false, true), Mode::Reading);

        let mut expected = GET_EMPTY_RESPONSE.to_vec();
        expected.extend_from_slice(&GET_EMPTY_RESPONSE);
        assert_eq!(transport.outgoing, expected);

        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Closed);
    }

    #[test]
    fn test_partial_request_then_eof_closes_unanswered() {
        // EOF with only a request prefix buffered: nothing to answer.
        let mut conn = connection();
        let request = get_request();
        let mut transport = MockTransport {
            eof: true,
            ..Default::default()
        };
        transport.incoming.push_back(request[..5].to_vec());

        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Closed);
        assert!(transport.outgoing.is_empty());
    }

    #[test]
    fn test_malformed_frame_closes() {
        let mut conn = connection();
        // GET whose key length is negative.
        let mut bytes = vec![opcode::GET, 0x00, 0x01, b's', 0x00];
        bytes.extend_from_slice(&(-1i32).to_be_bytes());

        let mut transport = MockTransport::default();
        transport.incoming.push_back(bytes);
        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Closed);
    }

    #[test]
    fn test_unknown_opcode_closes() {
        let mut conn = connection();
        let mut transport = MockTransport::default();
        transport.incoming.push_back(vec![0x7F, 0x00, 0x01, b's', 0x00]);
        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Closed);
    }

    #[test]
    fn test_oversize_request_closes() {
        let mut conn = Connection::with_buffer_size(
            handler(),
            "127.0.0.1:9".parse().unwrap(),
            32,
        );
        // A PUT that declares more data than the buffer can ever hold.
        let mut bytes = vec![opcode::PUT, 0x00, 0x01, b's', 0x00];
        bytes.extend_from_slice(&[0, 0, 0, 3, b'k', b'e', b'y']);
        bytes.extend_from_slice(&1_000_000i32.to_be_bytes());
        bytes.resize(32, 0);

        let mut transport = MockTransport::default();
        transport.incoming.push_back(bytes);
        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Closed);
    }

    #[test]
    fn test_error_response_keeps_the_connection_open() {
        let mut conn = connection();
        // Store "ghost" does not exist; the handler answers with an error
        // response instead of dying.
        let mut transport = MockTransport::default();
        transport.incoming.push_back(vec![
            opcode::GET,
            0x00, 0x05, b'g', b'h', b'o', b's', b't',
            0x00,
            0x00, 0x00, 0x00, 0x01, b'k',
        ]);

        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Writing);
        assert_eq!(conn.on_event(&mut transport, false, true), Mode::Reading);

        // Error code 1 plus the message; and the next request still works.
        assert_eq!(&transport.outgoing[..2], &[0x00, 0x01]);
        transport.outgoing.clear();

        transport.incoming.push_back(get_request());
        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Writing);
        assert_eq!(conn.on_event(&mut transport, false, true), Mode::Reading);
        assert_eq!(transport.outgoing, GET_EMPTY_RESPONSE);
    }

    #[test]
    fn test_stale_events_are_ignored() {
        let mut conn = connection();
        let mut transport = MockTransport::default();

        // A writable event while Reading does nothing.
        assert_eq!(conn.on_event(&mut transport, false, true), Mode::Reading);

        transport.incoming.push_back(get_request());
        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Writing);

        // A readable event while Writing does nothing either.
        assert_eq!(conn.on_event(&mut transport, true, false), Mode::Writing);
        assert!(transport.outgoing.is_empty());
    }
}
