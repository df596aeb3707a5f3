//! Shared test fixtures
//!
//! - `StubServer`: scripted loopback directory server on 127.0.0.1
//! - `SpyTransport`: in-memory transport counting every write
//! - builders for common responses

#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dirclient::config::ClientConfig;
use dirclient::model::{Attributes, Dn, Entry, PageControl};
use dirclient::network::{Session, Transport};
use dirclient::protocol::{
    read_message, write_message, LdapMessage, LdapResult, MessageId, ProtocolOp, ResultCode,
    SearchDone, MAX_MESSAGE_SIZE,
};
use parking_lot::Mutex;

// =============================================================================
// Stub Server
// =============================================================================

/// What the stub does in reaction to one request
pub enum Action {
    Send(LdapMessage),
    Delay(Duration),
    /// Write raw bytes, bypassing the encoder
    Raw(Vec<u8>),
    /// Drop the connection
    Close,
}

/// Loopback server accepting exactly one connection
///
/// Every received message is recorded and handed to the script, whose
/// actions are performed in order. The server stops on Unbind, on Close or
/// when the client goes away.
pub struct StubServer {
    address: String,
    received: Arc<Mutex<Vec<LdapMessage>>>,
    handle: Option<JoinHandle<()>>,
}

impl StubServer {
    pub fn start<F>(mut script: F) -> Self
    where
        F: FnMut(&LdapMessage) -> Vec<Action> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let received = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&received);

        let handle = thread::spawn(move || {
            let (mut stream, _) = match listener.accept() {
                Ok(conn) => conn,
                Err(_) => return,
            };

            loop {
                let message = match read_message(&mut stream, MAX_MESSAGE_SIZE) {
                    Ok(message) => message,
                    Err(_) => return,
                };
                recorder.lock().push(message.clone());

                if message.op == ProtocolOp::UnbindRequest {
                    return;
                }

                for action in script(&message) {
                    if !perform(&mut stream, action) {
                        return;
                    }
                }
            }
        });

        Self {
            address,
            received,
            handle: Some(handle),
        }
    }

    /// Server that answers every request with a plain success
    pub fn always_ok() -> Self {
        Self::start(|request| vec![Action::Send(ok_response(request))])
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Messages received so far
    pub fn received(&self) -> Vec<LdapMessage> {
        self.received.lock().clone()
    }

    /// Whether the server thread has stopped
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |handle| handle.is_finished())
    }

    /// Wait for the server to finish and return everything it received
    pub fn join(mut self) -> Vec<LdapMessage> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.received.lock().clone()
    }
}

fn perform(stream: &mut TcpStream, action: Action) -> bool {
    match action {
        Action::Send(message) => write_message(stream, &message).is_ok(),
        Action::Delay(duration) => {
            thread::sleep(duration);
            true
        }
        Action::Raw(bytes) => stream.write_all(&bytes).and_then(|_| stream.flush()).is_ok(),
        Action::Close => {
            let _ = stream.shutdown(Shutdown::Both);
            false
        }
    }
}

// =============================================================================
// Sessions
// =============================================================================

pub fn test_config(timeout_ms: u64) -> ClientConfig {
    ClientConfig::builder()
        .operation_timeout_ms(timeout_ms)
        .connect_timeout_ms(2000)
        .build()
}

/// Connected session to `server` with a 2 s operation timeout
pub fn connect(server: &StubServer) -> Session {
    Session::connect(server.address(), test_config(2000)).unwrap()
}

// =============================================================================
// Response Builders
// =============================================================================

pub fn result(code: ResultCode) -> LdapResult {
    LdapResult::new(code)
}

/// Final response of the matching kind carrying `code`
pub fn response_with(request: &LdapMessage, code: ResultCode) -> LdapMessage {
    let outcome = result(code);
    let op = match &request.op {
        ProtocolOp::BindRequest { .. } => ProtocolOp::BindResponse {
            result: outcome,
            sasl_credentials: None,
        },
        ProtocolOp::SearchRequest(_) => ProtocolOp::SearchResultDone(SearchDone {
            result: outcome,
            paging: None,
        }),
        ProtocolOp::ModifyRequest { .. } => ProtocolOp::ModifyResponse(outcome),
        ProtocolOp::AddRequest(_) => ProtocolOp::AddResponse(outcome),
        ProtocolOp::DelRequest(_) => ProtocolOp::DelResponse(outcome),
        ProtocolOp::CompareRequest { .. } => ProtocolOp::CompareResponse(outcome),
        ProtocolOp::ExtendedRequest { .. } => ProtocolOp::ExtendedResponse {
            result: outcome,
            name: None,
            value: None,
        },
        other => panic!("stub cannot answer {}", other.name()),
    };
    LdapMessage::new(request.id, op)
}

pub fn ok_response(request: &LdapMessage) -> LdapMessage {
    response_with(request, ResultCode::Success)
}

pub fn entry_message(id: MessageId, dn: &str) -> LdapMessage {
    let attributes = Attributes::new().with("cn", [dn]).unwrap();
    LdapMessage::new(
        id,
        ProtocolOp::SearchResultEntry(Entry::new(Dn::parse(dn).unwrap(), attributes)),
    )
}

pub fn search_done(id: MessageId, cookie: Option<&[u8]>) -> LdapMessage {
    LdapMessage::new(
        id,
        ProtocolOp::SearchResultDone(SearchDone {
            result: LdapResult::success(),
            paging: cookie.map(|c| PageControl {
                size: 0,
                cookie: c.to_vec(),
                critical: false,
            }),
        }),
    )
}

// =============================================================================
// Spy Transport
// =============================================================================

/// Transport that never produces data and counts write calls
pub struct SpyTransport {
    writes: Arc<AtomicUsize>,
}

impl SpyTransport {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let writes = Arc::new(AtomicUsize::new(0));
        (
            Self {
                writes: Arc::clone(&writes),
            },
            writes,
        )
    }
}

impl Read for SpyTransport {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for SpyTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for SpyTransport {
    fn try_clone_reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(io::empty()))
    }

    fn shutdown(&self) -> io::Result<()> {
        Ok(())
    }

    fn peer(&self) -> String {
        "spy".to_string()
    }
}
