//! The per-connection protocol state machine.
//!
//! A connection moves through `ReadingName`, `AwaitingIssuance` and
//! `WritingResponse` and ends up `Closed`, never revisiting a state. It
//! can go straight to `Closed` from any state. The connection only ever
//! performs non-blocking I/O and tells the event loop what to do next via
//! [`Next`]; it never touches the poll registry itself.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info};
use mio::net::TcpStream;

use crate::constants::READ_CHUNK_SIZE;
use crate::server::cache::IssuanceHandle;
use crate::server::protocol::{self, Framing};


//------------ ConnState -----------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnState {
    ReadingName,
    AwaitingIssuance,
    WritingResponse,
    Closed,
}


//------------ Next ----------------------------------------------------------

/// What the event loop should do with a connection after an event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Next {
    /// Nothing, wait for the next event.
    Wait,

    /// A request for this identity was read. Look up its issuance.
    Lookup(String),

    /// A response is ready. Switch interest to writable.
    Write,

    /// Nothing to write yet. Switch interest back to readable.
    Read,

    /// Forget the connection and close its socket.
    Close,
}


//------------ Connection ----------------------------------------------------

pub struct Connection<S = TcpStream> {
    stream: S,
    peer: SocketAddr,
    state: ConnState,
    read_buf: Vec<u8>,
    identity: Option<String>,
    handle: Option<Arc<IssuanceHandle>>,
    response: Option<Bytes>,
    written: usize,
}

impl<S: Read + Write> Connection<S> {
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Connection {
            stream,
            peer,
            state: ConnState::ReadingName,
            read_buf: Vec::new(),
            identity: None,
            handle: None,
            response: None,
            written: 0,
        }
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn handle(&self) -> Option<&Arc<IssuanceHandle>> {
        self.handle.as_ref()
    }

    /// Keeps the issuance this connection is waiting for.
    pub fn attach(&mut self, handle: Arc<IssuanceHandle>) {
        self.handle = Some(handle)
    }

    /// Reads everything currently available.
    ///
    /// While reading the name, bytes are buffered and scanned for the
    /// terminator. Anything arriving after the request is read and
    /// dropped. End of stream only closes the connection if no request
    /// has been received yet.
    pub fn on_readable(&mut self) -> Next {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut next = Next::Wait;
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    if self.state == ConnState::ReadingName {
                        debug!(
                            "Connection from {} closed before a request",
                            self.peer
                        );
                        return self.close()
                    }
                    return next
                }
                Ok(n) => {
                    if self.state != ConnState::ReadingName {
                        continue
                    }
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    match protocol::parse_request(&self.read_buf) {
                        Framing::Complete { identity, consumed } => {
                            self.read_buf.drain(..consumed);
                            info!(
                                "Request for '{}' from {}", identity, self.peer
                            );
                            self.identity = Some(identity.clone());
                            self.state = ConnState::AwaitingIssuance;
                            next = Next::Lookup(identity);
                        }
                        Framing::Oversized => {
                            debug!(
                                "Closing {}: {} bytes without terminator",
                                self.peer, self.read_buf.len()
                            );
                            return self.close()
                        }
                        Framing::Incomplete => { }
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return next
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => { }
                Err(err) => {
                    debug!("Read from {} failed: {}", self.peer, err);
                    return self.close()
                }
            }
        }
    }

    /// Accepts the outcome of the issuance.
    ///
    /// `None` means the issuance failed and the connection is closed
    /// without a response. Only the first call while awaiting issuance
    /// has any effect.
    pub fn respond(&mut self, response: Option<Bytes>) -> Next {
        if self.state != ConnState::AwaitingIssuance {
            return Next::Wait
        }
        match response {
            Some(response) => {
                debug!(
                    "Response of {} bytes ready for {}",
                    response.len(), self.peer
                );
                self.response = Some(response);
                self.written = 0;
                self.state = ConnState::WritingResponse;
                Next::Write
            }
            None => {
                debug!("Closing {}: issuance failed", self.peer);
                self.close()
            }
        }
    }

    /// Writes as much of the response as the socket takes.
    pub fn on_writable(&mut self) -> Next {
        let response = match self.response.as_ref() {
            Some(response) => response.clone(),
            None => return Next::Read,
        };
        while self.written < response.len() {
            match self.stream.write(&response[self.written..]) {
                Ok(0) => {
                    debug!("Write to {} returned zero", self.peer);
                    return self.close()
                }
                Ok(n) => self.written += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Next::Wait
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => { }
                Err(err) => {
                    debug!("Write to {} failed: {}", self.peer, err);
                    return self.close()
                }
            }
        }
        debug!("Sent {} bytes to {}", self.written, self.peer);
        self.close()
    }

    pub fn close(&mut self) -> Next {
        self.state = ConnState::Closed;
        Next::Close
    }
}


//------------ Tests ---------------------------------------------------------
