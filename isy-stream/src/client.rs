//! Sync-first event stream lifecycle
//!
//! [`EventStream`] exposes a blocking `start`/`stop` API. The channel, the
//! subscription handshake and the watch loop all live on a background worker
//! thread that owns its own tokio runtime, so the transport has exactly one
//! owner and request writes never race the loop's reads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::watch;

use crate::codec::{self, RequestTemplate};
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::framer::{FrameReader, FrameWriter};
use crate::heartbeat::HeartbeatState;
use crate::router::{EventHandler, Router};
use crate::session::{Endpoint, Session};
use crate::transport::{BoxedTransport, ConnectionInfo, Connector, TlsConnector};

/// Hook invoked when the stream could not connect or lost its connection.
pub type ConnectionLostCallback = Arc<dyn Fn() + Send + Sync>;

/// State observable from outside the worker.
struct Shared {
    session: Mutex<Session>,
    running: AtomicBool,
    connection: Mutex<Option<ConnectionInfo>>,
}

struct WorkerHandle {
    stop_tx: watch::Sender<bool>,
    thread: JoinHandle<()>,
}

/// Long-lived event subscription against a controller.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use isy_stream::{EventStream, NoopHandler, StreamConfig};
///
/// let config = StreamConfig::new("192.168.1.20", "admin", "admin");
/// let stream = EventStream::new(config, Arc::new(NoopHandler))?
///     .with_connection_lost(|| eprintln!("event stream lost"));
///
/// stream.start()?;
/// assert!(stream.running());
/// stream.stop();
/// ```
pub struct EventStream {
    endpoint: Endpoint,
    poll_interval: Duration,
    router: Router,
    connector: Arc<dyn Connector>,
    on_connection_lost: Option<ConnectionLostCallback>,
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl EventStream {
    /// Create a stream that connects over TLS as configured.
    pub fn new(config: StreamConfig, handler: Arc<dyn EventHandler>) -> Result<Self> {
        config.validate()?;
        let connector = TlsConnector::from_config(&config)?;

        Ok(Self {
            endpoint: Endpoint::from_config(&config),
            poll_interval: config.poll_interval,
            router: Router::new(handler, config.weather_enabled),
            connector: Arc::new(connector),
            on_connection_lost: None,
            shared: Arc::new(Shared {
                session: Mutex::new(Session::new(config.first_heartbeat_timeout)),
                running: AtomicBool::new(false),
                connection: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Replace the transport used to reach the controller.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Register the hook called when connecting fails or the link is lost.
    ///
    /// The hook runs on the worker thread (or the thread calling `start` for
    /// connect failures). Calling `start` or `stop` from inside it is allowed.
    pub fn with_connection_lost<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_connection_lost = Some(Arc::new(callback));
        self
    }

    /// Connect, subscribe and start watching for events.
    ///
    /// Does nothing if the stream is already running. A failed connect or
    /// subscribe is reported through the connection-lost hook and returned;
    /// it is not retried. Other startup errors are only returned.
    pub fn start(&self) -> Result<()> {
        let ready_rx = {
            let mut worker = self.worker.lock();
            if self.shared.running.swap(true, Ordering::SeqCst) {
                tracing::debug!("Event stream already running");
                return Ok(());
            }

            tracing::info!(
                "Starting event stream updates from {}:{}",
                self.endpoint.address,
                self.endpoint.port
            );

            let (ready_tx, ready_rx) = mpsc::channel();
            let (stop_tx, stop_rx) = watch::channel(false);
            let stream_worker = StreamWorker {
                endpoint: self.endpoint.clone(),
                poll_interval: self.poll_interval,
                router: self.router.clone(),
                connector: Arc::clone(&self.connector),
                on_connection_lost: self.on_connection_lost.clone(),
                shared: Arc::clone(&self.shared),
                link: None,
            };

            let thread = thread::Builder::new()
                .name("isy-event-stream".to_string())
                .spawn(move || spawn_runtime(stream_worker, stop_rx, ready_tx))
                .map_err(|e| {
                    self.shared.running.store(false, Ordering::SeqCst);
                    StreamError::WorkerUnavailable(e.to_string())
                })?;

            // A previous worker that already exited is simply detached
            *worker = Some(WorkerHandle { stop_tx, thread });
            ready_rx
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!("Could not connect to event stream: {}", e);
                if e.is_connection_loss() {
                    self.notify_connection_lost();
                }
                Err(e)
            }
            Err(_) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(StreamError::WorkerUnavailable(
                    "Event stream worker exited during startup".to_string(),
                ))
            }
        }
    }

    /// Unsubscribe and disconnect. Safe to call in any state, any number of times.
    pub fn stop(&self) {
        let Some(handle) = self.worker.lock().take() else {
            tracing::debug!("Event stream not running, nothing to stop");
            return;
        };

        tracing::info!("Stopping event stream updates");
        let _ = handle.stop_tx.send(true);

        if handle.thread.thread().id() == thread::current().id() {
            // Called from the connection-lost hook; the loop has already exited
            return;
        }
        if handle.thread.join().is_err() {
            tracing::error!("Event stream worker panicked");
            self.shared.running.store(false, Ordering::SeqCst);
            self.shared.session.lock().mark_disconnected();
        }
    }

    /// Whether the watch loop is alive.
    pub fn running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.session.lock().is_connected()
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared.session.lock().is_subscribed()
    }

    /// Session id the controller assigned, used to resume the subscription.
    pub fn session_id(&self) -> Option<String> {
        self.shared.session.lock().session_id().map(str::to_string)
    }

    /// Snapshot of the heartbeat tracker.
    pub fn heartbeat(&self) -> HeartbeatState {
        *self.shared.session.lock().heartbeat()
    }

    /// Details of the open channel, if any.
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.shared.connection.lock().clone()
    }

    fn notify_connection_lost(&self) {
        if let Some(callback) = &self.on_connection_lost {
            callback();
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_runtime(
    worker: StreamWorker,
    stop_rx: watch::Receiver<bool>,
    ready_tx: mpsc::Sender<Result<()>>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create tokio runtime for event stream: {}", e);
            worker.shared.running.store(false, Ordering::SeqCst);
            let _ = ready_tx.send(Err(StreamError::WorkerUnavailable(e.to_string())));
            return;
        }
    };

    rt.block_on(worker.run(stop_rx, ready_tx));
}

/// Why the watch loop returned.
#[derive(Debug)]
enum LoopExit {
    /// Asked to stop, or no longer subscribed
    Stopped,
    /// Connection considered lost
    Lost(StreamError),
}

/// Reader and writer over one open channel.
struct Link {
    reader: FrameReader<ReadHalf<BoxedTransport>>,
    writer: FrameWriter<WriteHalf<BoxedTransport>>,
}

/// Everything the background thread needs for one run of the stream.
struct StreamWorker {
    endpoint: Endpoint,
    poll_interval: Duration,
    router: Router,
    connector: Arc<dyn Connector>,
    on_connection_lost: Option<ConnectionLostCallback>,
    shared: Arc<Shared>,
    link: Option<Link>,
}

impl StreamWorker {
    async fn run(mut self, mut stop_rx: watch::Receiver<bool>, ready_tx: mpsc::Sender<Result<()>>) {
        if let Err(e) = self.open().await {
            self.disconnect().await;
            self.shared.running.store(false, Ordering::SeqCst);
            let _ = ready_tx.send(Err(e));
            return;
        }
        let _ = ready_tx.send(Ok(()));

        match self.watch(&mut stop_rx).await {
            LoopExit::Stopped => {
                if let Err(e) = self.unsubscribe().await {
                    tracing::warn!("Failed to unsubscribe from event stream: {}", e);
                }
                self.disconnect().await;
                self.shared.running.store(false, Ordering::SeqCst);
                tracing::info!("Event stream stopped");
            }
            LoopExit::Lost(reason) => {
                self.disconnect().await;
                self.shared.running.store(false, Ordering::SeqCst);
                tracing::warn!("Lost connection to the event stream: {}", reason);
                if let Some(callback) = &self.on_connection_lost {
                    callback();
                }
            }
        }
    }

    async fn open(&mut self) -> Result<()> {
        self.connect().await?;
        self.subscribe().await.map_err(subscribe_failure)
    }

    async fn connect(&mut self) -> Result<()> {
        if self.link.is_some() {
            return Ok(());
        }

        let connected = self.connector.connect(&self.endpoint).await?;
        let (read_half, write_half) = tokio::io::split(connected.stream);
        self.link = Some(Link {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
        });

        self.shared.session.lock().mark_connected();
        *self.shared.connection.lock() = Some(connected.info);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.writer.shutdown().await {
                tracing::debug!("Error shutting down event channel: {}", e);
            }
        }
        self.shared.session.lock().mark_disconnected();
        *self.shared.connection.lock() = None;
    }

    /// Send a subscribe request, resuming the known session id if any.
    async fn subscribe(&mut self) -> Result<()> {
        let (template, frame) = {
            let session = self.shared.session.lock();
            if session.is_subscribed() || !session.is_connected() {
                return Ok(());
            }
            let template = RequestTemplate::subscribe_for(session.session_id());
            (template, codec::build(template, &self.endpoint.params(&session)))
        };

        self.write(&frame).await?;
        self.shared.session.lock().mark_subscribed(Instant::now());
        tracing::debug!("Sent {:?} request to event stream", template);
        Ok(())
    }

    /// Send an unsubscribe request and forget the session id.
    async fn unsubscribe(&mut self) -> Result<()> {
        let frame = {
            let session = self.shared.session.lock();
            if !session.is_subscribed() || !session.is_connected() {
                return Ok(());
            }
            codec::build(RequestTemplate::Unsubscribe, &self.endpoint.params(&session))
        };

        let result = self.write(&frame).await;
        self.shared.session.lock().mark_unsubscribed();
        tracing::debug!("Sent Unsubscribe request to event stream");
        result
    }

    async fn write(&mut self, frame: &str) -> Result<()> {
        let link = self.link.as_mut().ok_or(StreamError::NotReady)?;
        link.writer.write(frame).await?;
        Ok(())
    }

    async fn read(&mut self) -> Result<Vec<String>> {
        let link = self.link.as_mut().ok_or(StreamError::NotReady)?;
        Ok(link.reader.read().await)
    }

    /// Watch for events until stopped or the connection is lost.
    async fn watch(&mut self, stop_rx: &mut watch::Receiver<bool>) -> LoopExit {
        loop {
            if *stop_rx.borrow() {
                return LoopExit::Stopped;
            }

            {
                let session = self.shared.session.lock();
                if !session.is_subscribed() {
                    return LoopExit::Stopped;
                }
                if let Err(e) = session.heartbeat().check(Instant::now()) {
                    return LoopExit::Lost(e);
                }
            }

            let poll_interval = self.poll_interval;
            tokio::select! {
                changed = stop_rx.changed() => {
                    // A dropped sender means the EventStream itself is gone
                    if changed.is_err() || *stop_rx.borrow() {
                        return LoopExit::Stopped;
                    }
                }
                frames = tokio::time::timeout(poll_interval, self.read()) => {
                    match frames {
                        Ok(Ok(frames)) => self.dispatch(frames),
                        Ok(Err(e)) => return LoopExit::Lost(e),
                        // Nothing arrived within the poll interval
                        Err(_) => {}
                    }
                    if self.link.as_ref().map_or(true, |link| link.reader.is_closed()) {
                        return LoopExit::Lost(StreamError::ConnectionClosed(
                            "event channel closed by controller".to_string(),
                        ));
                    }
                }
            }
        }
    }

    fn dispatch(&self, frames: Vec<String>) {
        for frame in frames {
            if let Some(document) = codec::clean_frame(&frame) {
                self.router.route_frame(&document, &self.shared.session);
            }
        }
    }
}

/// A channel that accepted the connection but not the subscribe request is
/// as good as closed.
fn subscribe_failure(error: StreamError) -> StreamError {
    match error {
        StreamError::Io(e) => {
            StreamError::ConnectionClosed(format!("Subscribe request could not be sent: {}", e))
        }
        other => other,
    }
}
