//! Selector Event Loop
//!
//! The acceptor: one poll loop on one thread owns the listener and every
//! connection. Each wakeup hands readiness to the matching connection's
//! state machine, then reconciles the socket's registration with whatever
//! interest the connection now declares. Connections never migrate between
//! threads, so their buffers and state need no synchronization.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, error, info};

use crate::protocol::RequestHandler;

use super::connection::{Connection, Mode};

/// The listener's token; connections get tokens counting up from 1.
const LISTENER: Token = Token(0);

/// Poll events drained per wakeup.
const EVENT_CAPACITY: usize = 1024;

/// The socket server: accepts connections and runs their state machines
/// against a shared request handler.
pub struct Server {
    listener: TcpListener,
    handler: Arc<dyn RequestHandler>,
}

impl Server {
    /// Binds the listening socket. The poll loop starts on
    /// [`run`](Self::run).
    pub fn bind(addr: SocketAddr, handler: Arc<dyn RequestHandler>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self { listener, handler })
    }

    /// The bound address; useful when binding to port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the selector loop forever (or until the poll itself fails).
    pub fn run(mut self) -> io::Result<()> {
        let mut poll = Poll::new()?;
        let mut events = Events::with_capacity(EVENT_CAPACITY);
        poll.registry()
            .register(&mut self.listener, LISTENER, Interest::READABLE)?;

        info!(addr = %self.listener.local_addr()?, "listening");

        let mut connections: HashMap<Token, (TcpStream, Connection)> = HashMap::new();
        let mut next_token = LISTENER.0 + 1;

        loop {
            poll.poll(&mut events, None)?;

            for event in events.iter() {
                match event.token() {
                    LISTENER => {
                        accept_ready(
                            &mut self.listener,
                            &poll,
                            &mut connections,
                            &mut next_token,
                            &self.handler,
                        );
                    }
                    token => {
                        let Some((stream, conn)) = connections.get_mut(&token) else {
                            // Closed earlier in this batch of events.
                            continue;
                        };

                        let interest_before = conn.interest();
                        let mode =
                            conn.on_event(stream, event.is_readable(), event.is_writable());

                        match conn.interest() {
                            None => {
                                debug_assert_eq!(mode, Mode::Closed);
                                drop_connection(&poll, &mut connections, token);
                            }
                            Some(interest) if Some(interest) != interest_before => {
                                if let Err(e) =
                                    poll.registry().reregister(stream, token, interest)
                                {
                                    error!(error = %e, "reregister failed, dropping connection");
                                    drop_connection(&poll, &mut connections, token);
                                }
                            }
                            Some(_) => {}
                        }
                    }
                }
            }
        }
    }
}

/// Deregisters and drops a connection; dropping the stream closes the
/// socket and releases the connection's buffers.
fn drop_connection(
    poll: &Poll,
    connections: &mut HashMap<Token, (TcpStream, Connection)>,
    token: Token,
) {
    if let Some((mut stream, _)) = connections.remove(&token) {
        if let Err(e) = poll.registry().deregister(&mut stream) {
            debug!(error = %e, "deregister failed");
        }
    }
}

/// Accepts every pending connection and registers it for reads.
fn accept_ready(
    listener: &mut TcpListener,
    poll: &Poll,
    connections: &mut HashMap<Token, (TcpStream, Connection)>,
    next_token: &mut usize,
    handler: &Arc<dyn RequestHandler>,
) {
    loop {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                let token = Token(*next_token);
                *next_token += 1;

                if let Err(e) = poll.registry().register(&mut stream, token, Interest::READABLE)
                {
                    error!(client = %peer, error = %e, "failed to register connection");
                    continue;
                }

                info!(client = %peer, "client connected");
                connections.insert(token, (stream, Connection::new(Arc::clone(handler), peer)));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                error!(error = %e, "accept failed");
                break;
            }
        }
    }
}
