//! Test helpers for driving an EventStream against an in-memory controller.
//!
//! - `MockConnector` hands the stream one half of a duplex pipe per connect
//! - `RejectWrites` wraps a pipe whose writes always fail
//! - `MockController` receives the other half and plays the controller
//! - `RecordingHandler` captures routed events
//! - helpers to render controller event lines

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use isy_stream::{
    Connected, ConnectionInfo, Connector, Endpoint, EventHandler, EventMessage, StreamError,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Connector that opens in-memory channels instead of TLS sockets.
pub struct MockConnector {
    server_tx: Mutex<mpsc::Sender<DuplexStream>>,
    fail: AtomicBool,
    reject_writes: AtomicBool,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, MockController) {
        let (server_tx, server_rx) = mpsc::channel();
        let connector = Arc::new(Self {
            server_tx: Mutex::new(server_tx),
            fail: AtomicBool::new(false),
            reject_writes: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        });
        (connector, MockController::new(server_rx))
    }

    /// Make subsequent connects fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Accept connects but fail every write on the opened channel.
    pub fn set_rejecting_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &Endpoint) -> isy_stream::Result<Connected> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(StreamError::ConnectFailure(format!(
                "{}:{}: connection refused",
                endpoint.address, endpoint.port
            )));
        }

        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        if self.reject_writes.load(Ordering::SeqCst) {
            return Ok(Connected {
                stream: Box::new(RejectWrites {
                    inner: client,
                    _peer: server,
                }),
                info: ConnectionInfo {
                    address: endpoint.address.clone(),
                    port: endpoint.port,
                    protocol: Some("mock".to_string()),
                    peer_certificate: None,
                },
            });
        }
        self.server_tx
            .lock()
            .unwrap()
            .send(server)
            .map_err(|_| StreamError::ConnectFailure("controller gone".to_string()))?;

        Ok(Connected {
            stream: Box::new(client),
            info: ConnectionInfo {
                address: endpoint.address.clone(),
                port: endpoint.port,
                protocol: Some("mock".to_string()),
                peer_certificate: None,
            },
        })
    }
}

/// Channel that can be read from but refuses every write.
pub struct RejectWrites {
    inner: DuplexStream,
    _peer: DuplexStream,
}

impl AsyncRead for RejectWrites {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RejectWrites {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "write rejected")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// The controller side of every channel the stream opens.
pub struct MockController {
    server_rx: mpsc::Receiver<DuplexStream>,
    rt: tokio::runtime::Runtime,
}

impl MockController {
    fn new(server_rx: mpsc::Receiver<DuplexStream>) -> Self {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to build controller runtime");
        Self { server_rx, rt }
    }

    /// Wait for the stream to open its next channel.
    pub fn accept(&self) -> ControllerConnection<'_> {
        let stream = self
            .server_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("Stream never connected");
        ControllerConnection {
            stream: Some(stream),
            rt: &self.rt,
            buffer: String::new(),
        }
    }
}

/// One accepted channel, seen from the controller.
pub struct ControllerConnection<'a> {
    stream: Option<DuplexStream>,
    rt: &'a tokio::runtime::Runtime,
    buffer: String,
}

impl ControllerConnection<'_> {
    /// Read one complete SOAP request sent by the stream.
    pub fn read_request(&mut self) -> String {
        const END: &str = "</s:Envelope>\r\n";
        let stream = self.stream.as_mut().expect("connection closed");
        let buffer = &mut self.buffer;

        self.rt.block_on(async {
            let deadline = Instant::now() + Duration::from_secs(5);
            let mut chunk = [0u8; 1024];
            loop {
                if let Some(pos) = buffer.find(END) {
                    let request: String = buffer.drain(..pos + END.len()).collect();
                    return request;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                let n = tokio::time::timeout(remaining, stream.read(&mut chunk))
                    .await
                    .expect("Timed out waiting for request")
                    .expect("Read failed");
                assert!(n > 0, "Stream closed before sending a full request");
                buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
            }
        })
    }

    /// Push raw bytes to the stream.
    pub fn send(&mut self, data: &str) {
        let stream = self.stream.as_mut().expect("connection closed");
        self.rt.block_on(async {
            stream.write_all(data.as_bytes()).await.expect("Write failed");
            stream.flush().await.expect("Flush failed");
        });
    }

    /// Whether the stream closed its end (read returns EOF).
    pub fn is_closed_by_client(&mut self) -> bool {
        let stream = self.stream.as_mut().expect("connection closed");
        self.rt.block_on(async {
            let mut chunk = [0u8; 1024];
            loop {
                match tokio::time::timeout(Duration::from_secs(2), stream.read(&mut chunk)).await {
                    Ok(Ok(0)) | Ok(Err(_)) => return true,
                    Ok(Ok(_)) => continue,
                    Err(_) => return false,
                }
            }
        })
    }

    /// Drop the controller end of the channel.
    pub fn close(&mut self) {
        self.stream.take();
    }
}

/// Handler that records every routed event as a short string.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl EventHandler for RecordingHandler {
    fn on_node_update(&self, message: &EventMessage) {
        self.push(format!(
            "node:{}:{}",
            message.node().unwrap_or_default(),
            message.action().unwrap_or_default()
        ));
    }

    fn on_climate_update(&self, _message: &EventMessage) {
        self.push("climate".to_string());
    }

    fn on_variable_update(&self, _message: &EventMessage) {
        self.push("variable".to_string());
    }

    fn on_program_update(&self, _message: &EventMessage) {
        self.push("program".to_string());
    }

    fn on_programs_refresh_all(&self) {
        self.push("refresh".to_string());
    }
}

/// Poll `condition` until it holds or `timeout` expires.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// A pushed event line, as the controller sends it on a reused socket.
pub fn event_line(sid: &str, control: &str, action: &str, node: &str, event_info: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?><Event seqnum=\"1\" sid=\"{}\"><control>{}</control><action>{}</action><node>{}</node><eventInfo>{}</eventInfo></Event>POST reuse HTTP/1.1\n",
        sid, control, action, node, event_info
    )
}

pub fn heartbeat_line(sid: &str, wait_secs: u64) -> String {
    event_line(sid, "_0", &wait_secs.to_string(), "", "")
}

pub fn status_line(sid: &str, node: &str, value: i32) -> String {
    event_line(sid, "ST", &value.to_string(), node, "")
}
