//! The I/O event loop.
//!
//! One thread owns the listener, every connection and the poll registry.
//! Other threads only talk to it by pushing an [`IoTask`] into its queue
//! and waking the poll through the [`Notifier`].

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use log::{debug, error, info, warn};
use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::commons::{Error, KeyServerEmptyResult, KeyServerResult};
use crate::constants::KEYSERVER_APP;
use crate::server::conn::{Connection, Next};
use crate::server::context::ServerContext;


/// Token for the listening socket.
const LISTENER: Token = Token(0);

/// Token for the waker.
const WAKER: Token = Token(1);

/// The first token handed out to a connection.
const FIRST_CONNECTION: usize = 2;

/// Maximum number of events processed per poll.
const MAX_EVENTS: usize = 1024;


//------------ IoTask --------------------------------------------------------

/// Work for the event loop submitted from another thread.
#[derive(Debug)]
pub enum IoTask {
    /// The issuance for a connection resolved.
    ///
    /// `None` means it failed and the connection is to be closed.
    Respond { token: Token, response: Option<Bytes> },

    /// Stop the event loop.
    Shutdown,
}


//------------ Notifier ------------------------------------------------------

/// Hands tasks to the event loop from any thread.
#[derive(Clone, Debug)]
pub struct Notifier {
    tx: Sender<IoTask>,
    waker: Arc<Waker>,
}

impl Notifier {
    pub fn notify(&self, task: IoTask) {
        // The event loop is gone, nobody is listening any more.
        if self.tx.send(task).is_err() {
            return
        }
        if let Err(err) = self.waker.wake() {
            warn!("Failed to wake event loop: {}", err);
        }
    }
}


//------------ EventLoop -----------------------------------------------------

pub struct EventLoop {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    notifier: Notifier,
    tasks: Receiver<IoTask>,

    /// Tokens are never reused, so a late task for a closed connection
    /// finds nothing here.
    connections: HashMap<Token, Connection>,
    next_token: usize,
    context: Arc<ServerContext>,
    running: bool,

    /// The listener may still hold connections after a failed accept.
    ///
    /// Readiness is edge-triggered, so no new event will announce them.
    accept_pending: bool,
}

impl EventLoop {
    /// Binds the listener and sets up the poll.
    pub fn bind(
        addr: SocketAddr, context: Arc<ServerContext>,
    ) -> KeyServerResult<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        poll.registry().register(
            &mut listener, LISTENER, Interest::READABLE
        )?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let (tx, tasks) = mpsc::channel();

        Ok(EventLoop {
            poll,
            listener,
            local_addr,
            notifier: Notifier { tx, waker },
            tasks,
            connections: HashMap::new(),
            next_token: FIRST_CONNECTION,
            context,
            running: true,
            accept_pending: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the loop on the current thread until shut down.
    pub fn run(mut self) -> KeyServerEmptyResult {
        info!("{} listening on {}", KEYSERVER_APP, self.local_addr);
        let mut events = Events::with_capacity(MAX_EVENTS);
        let timeout = self.context.poll_timeout();

        loop {
            self.drain_tasks();
            if !self.running {
                break
            }
            if self.accept_pending {
                self.accept();
            }

            if let Err(err) = self.poll.poll(&mut events, Some(timeout)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue
                }
                error!("Polling failed: {}", err);
                return Err(err.into())
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept(),
                    // Tasks are drained at the top of the loop.
                    WAKER => { }
                    token => self.ready(token, event),
                }
            }
        }

        info!(
            "Event loop stopped with {} open connections",
            self.connections.len()
        );
        Ok(())
    }

    /// Runs the loop on a new thread.
    pub fn spawn(self) -> KeyServerResult<ServerHandle> {
        let local_addr = self.local_addr;
        let notifier = self.notifier.clone();
        let thread = thread::Builder::new()
            .name("keyserver-io".into())
            .spawn(move || self.run())?;
        Ok(ServerHandle { local_addr, notifier, thread: Some(thread) })
    }

    fn drain_tasks(&mut self) {
        loop {
            match self.tasks.try_recv() {
                Ok(IoTask::Respond { token, response }) => {
                    self.respond(token, response)
                }
                Ok(IoTask::Shutdown) => self.running = false,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.running = false;
                    break
                }
            }
        }
    }

    fn accept(&mut self) {
        self.accept_pending = false;
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(err) = self.poll.registry().register(
                        &mut stream, token, Interest::READABLE
                    ) {
                        warn!(
                            "Failed to register connection from {}: {}",
                            peer, err
                        );
                        continue
                    }
                    debug!("Accepted connection {} from {}", token.0, peer);
                    self.connections.insert(
                        token, Connection::new(stream, peer)
                    );
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    break
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => { }
                Err(err) => {
                    warn!("Failed to accept connection: {}", err);
                    self.accept_pending = true;
                    break
                }
            }
        }
    }

    fn ready(&mut self, token: Token, event: &Event) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return
        };
        let mut next = Next::Wait;
        if event.is_readable() || event.is_read_closed() || event.is_error() {
            next = conn.on_readable();
        }
        if next == Next::Wait && event.is_writable() {
            next = conn.on_writable();
        }
        self.apply(token, next)
    }

    fn apply(&mut self, token: Token, next: Next) {
        match next {
            Next::Wait => { }
            Next::Lookup(identity) => self.lookup(token, &identity),
            Next::Write => self.reregister(token, Interest::WRITABLE),
            Next::Read => self.reregister(token, Interest::READABLE),
            Next::Close => self.close(token),
        }
    }

    /// Attaches the connection to the issuance for `identity`.
    fn lookup(&mut self, token: Token, identity: &str) {
        let handle = self.context.cache().obtain(identity);
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.attach(handle.clone());
        }
        let notifier = self.notifier.clone();
        handle.observe(move |outcome| {
            let response = outcome.as_ref().ok().map(|creds| {
                creds.response()
            });
            notifier.notify(IoTask::Respond { token, response });
        });
    }

    fn respond(&mut self, token: Token, response: Option<Bytes>) {
        let next = match self.connections.get_mut(&token) {
            Some(conn) => conn.respond(response),
            None => {
                debug!("Dropping response for closed connection {}", token.0);
                return
            }
        };
        self.apply(token, next)
    }

    fn reregister(&mut self, token: Token, interest: Interest) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return
        };
        if let Err(err) = self.poll.registry().reregister(
            conn.stream_mut(), token, interest
        ) {
            debug!("Failed to reregister {}: {}", conn.peer(), err);
            self.close(token)
        }
    }

    fn close(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(conn.stream_mut());
            debug!("Closed connection {} from {}", token.0, conn.peer());
        }
    }
}


//------------ ServerHandle --------------------------------------------------

/// Controls an event loop running on its own thread.
///
/// Dropping the handle shuts the loop down.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    notifier: Notifier,
    thread: Option<JoinHandle<KeyServerEmptyResult>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the event loop and waits for its thread to finish.
    pub fn shutdown(mut self) -> KeyServerEmptyResult {
        self.stop()
    }

    fn stop(&mut self) -> KeyServerEmptyResult {
        let Some(thread) = self.thread.take() else {
            return Ok(())
        };
        self.notifier.notify(IoTask::Shutdown);
        thread.join().map_err(|_| {
            Error::WorkerPanic("event loop thread panicked".into())
        })?
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}


//------------ Tests ---------------------------------------------------------
