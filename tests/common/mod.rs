#![allow(dead_code)] // Different tests use different parts.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use openssl::nid::Nid;
use openssl::x509::X509Ref;
use tempfile::TempDir;

use keyserver::client::{self, KeyClient};
use keyserver::server::{EventLoop, ServerContext, ServerHandle};
use keyserver::signing::{CaKey, IssuanceBackend};


/// The issuer name of the test CA.
pub const TEST_ISSUER: &str = "CN=Integration CA,O=KeyServer";

/// How long a test waits for the server at most.
pub const READ_TIMEOUT: Duration = Duration::from_secs(120);


//------------ TestServer ----------------------------------------------------

/// A server on a random local port with a freshly generated CA.
pub struct TestServer {
    handle: Option<ServerHandle>,
    context: Arc<ServerContext>,
    ca: Arc<CaKey>,
    dir: TempDir,
}

impl TestServer {
    pub fn start(backend: Arc<dyn IssuanceBackend>) -> Self {
        Self::start_with_threads(backend, 2)
    }

    pub fn start_with_threads(
        backend: Arc<dyn IssuanceBackend>, threads: usize,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("ca.key");
        client::generate_ca_key(&key_path, 2048).unwrap();
        let ca = Arc::new(CaKey::load(&key_path, TEST_ISSUER).unwrap());

        let context = Arc::new(ServerContext::new(
            ca.clone(), backend, threads, Duration::from_millis(50)
        ).unwrap());
        let handle = EventLoop::bind(
            ([127, 0, 0, 1], 0).into(), context.clone()
        ).unwrap().spawn().unwrap();

        TestServer { handle: Some(handle), context, ca, dir }
    }

    pub fn addr(&self) -> SocketAddr {
        match self.handle.as_ref() {
            Some(handle) => handle.local_addr(),
            None => panic!("server was shut down"),
        }
    }

    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    pub fn ca(&self) -> &CaKey {
        &self.ca
    }

    pub fn out_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn client(&self) -> KeyClient {
        KeyClient::new("127.0.0.1", self.addr().port())
    }

    /// Sends raw bytes and returns everything until the server closes.
    pub fn raw_request(&self, payload: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(self.addr()).unwrap();
        stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
        // The server may close on us while we are still writing.
        let _ = stream.write_all(payload);
        read_until_closed(&mut stream)
    }

    pub fn request(&self, identity: &str) -> Vec<u8> {
        let mut payload = identity.as_bytes().to_vec();
        payload.push(0);
        self.raw_request(&payload)
    }

    pub fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().unwrap();
        }
    }
}

/// Reads until end of stream. A reset counts as the end, too.
pub fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut res = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return res,
            Ok(n) => res.extend_from_slice(&buf[..n]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => { }
            Err(err) if err.kind() == io::ErrorKind::ConnectionReset => {
                return res
            }
            Err(err) => panic!("read failed: {}", err),
        }
    }
}

/// Returns the raw bytes of the certificate's common name.
pub fn common_name(cert: &X509Ref) -> Vec<u8> {
    cert.subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .unwrap()
        .data()
        .as_slice()
        .to_vec()
}

