//! The connection manager owns the single device connection.
//!
//! It enforces the connection state machine:
//!
//! ```text
//! Closed --open--> Opening --ok--> Open --close--> Closing --> Closed
//!                     \--fail--> Closed     \--I/O fault--> Error --close--> Closing --> Closed
//! ```
//!
//! All state changes and device writes happen under one async mutex.
//! The reader task never holds that mutex while reading, and nothing
//! waits for the reader task while holding it.
//! Every transition is broadcast as a status message while the mutex is held,
//! so subscribers see transitions in the order they happened.
//!
//! Opening and closing run in tasks of their own. A caller that goes away
//! halfway, such as an HTTP client hanging up, can't leave the state
//! stuck in `Opening` or `Closing`.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncWriteExt, WriteHalf},
    sync::{Mutex, MutexGuard},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::{
    codec::{Encoder, FramedRead},
    sync::CancellationToken,
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    config::Config,
    device::{Connector, DeviceSettings, SerialIo},
    error::Error,
    events::ConnectionState,
    hub::BroadcastHub,
    serial::{codecs::lines::LinesCodec, error::SerialPortError},
};

mod reader;

/// The result of a successful open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opened {
    /// The state after opening, i.e. open.
    pub state: ConnectionState,

    /// The port which was opened.
    pub port: String,

    /// The baud rate used.
    pub baud: u32,
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    read: Duration,
    open: Duration,
    close: Duration,
    write: Duration,
}

impl From<&Config> for Timeouts {
    fn from(config: &Config) -> Self {
        Self {
            read: config.read_timeout(),
            open: config.open_timeout(),
            close: config.close_timeout(),
            write: config.write_timeout(),
        }
    }
}

/// Exclusive ownership of an open device.
struct SerialSession {
    settings: DeviceSettings,

    writer: WriteHalf<Box<dyn SerialIo>>,
    codec: LinesCodec,

    // Cancelled exactly when the session ends.
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

impl SerialSession {
    /// Stop the reader and release the device.
    /// Waits at most `bound` for the reader before aborting it.
    async fn shutdown(self, bound: Duration) {
        let Self {
            settings,
            writer,
            cancel,
            mut reader,
            ..
        } = self;

        cancel.cancel();
        drop(writer);

        match timeout(bound, &mut reader).await {
            Ok(Ok(())) => debug!(%settings, "Reader stopped"),
            Ok(Err(e)) => warn!(%settings, ?e, "Reader task failed"),
            Err(_) => {
                warn!(%settings, ?bound, "Reader did not stop in time, aborting it");
                reader.abort();
            }
        }

        info!(%settings, "Device released");
    }
}

struct Inner {
    state: ConnectionState,
    session: Option<SerialSession>,
}

struct Shared {
    inner: Mutex<Inner>,

    // Also holds a copy of `Inner::state`, readable without waiting for the mutex.
    hub: BroadcastHub,
    connector: Arc<dyn Connector>,
    timeouts: Timeouts,
    active_readers: AtomicUsize,
}

impl Shared {
    fn transition(&self, inner: &mut Inner, to: ConnectionState) {
        debug!(from = %inner.state, %to, "State transition");

        inner.state = to;
        self.hub.publish_state(to);
    }

    /// End the current session because of a device fault.
    /// Returns the reader, which the caller should join after letting go of the lock.
    fn fail(&self, inner: &mut Inner) -> Option<SerialSession> {
        let session = inner.session.take();

        if let Some(session) = &session {
            session.cancel.cancel();
        }

        self.transition(inner, ConnectionState::Error);

        session
    }

    async fn open(self: Arc<Self>, port: String, baud: u32) -> Result<Opened, Error> {
        let mut inner = self.inner.lock().await;

        if inner.state != ConnectionState::Closed {
            return Err(Error::InvalidState(format!(
                "Can't open while {}, close first",
                inner.state
            )));
        }

        let settings = DeviceSettings::new(&port, baud);
        self.transition(&mut inner, ConnectionState::Opening);

        let acquisition = self.connector.connect(&settings);
        let io = match timeout(self.timeouts.open, acquisition).await {
            Ok(Ok(io)) => io,
            Ok(Err(e)) => {
                warn!(%settings, %e, "Could not open device");
                self.transition(&mut inner, ConnectionState::Closed);
                return Err(e.into());
            }
            Err(_) => {
                warn!(%settings, "Timed out opening device");
                self.transition(&mut inner, ConnectionState::Closed);
                return Err(SerialPortError::Timeout(self.timeouts.open).into());
            }
        };

        let (read_half, writer) = tokio::io::split(io);
        let codec = LinesCodec::default();
        let cancel = CancellationToken::new();

        // Broadcast before the reader exists, so no data can precede it.
        self.transition(&mut inner, ConnectionState::Open);

        let reader = tokio::spawn(
            reader::run(
                reader::ActiveReader::new(Arc::clone(&self)),
                FramedRead::new(read_half, codec.clone()),
                cancel.clone(),
            )
            .instrument(info_span!("reader", %settings)),
        );

        info!(%settings, "Device open");

        inner.session = Some(SerialSession {
            settings,
            writer,
            codec,
            cancel,
            reader,
        });

        Ok(Opened {
            state: ConnectionState::Open,
            port,
            baud,
        })
    }

    async fn close(self: Arc<Self>) -> ConnectionState {
        let mut inner = self.inner.lock().await;

        match inner.state {
            ConnectionState::Closed => {
                debug!("Already closed");
                return ConnectionState::Closed;
            }
            ConnectionState::Closing => {
                drop(inner);
                debug!("Another close is in progress, waiting for it");
                return self.wait_while_closing().await;
            }
            ConnectionState::Opening | ConnectionState::Open | ConnectionState::Error => {}
        }

        let session = inner.session.take();
        if let Some(session) = &session {
            session.cancel.cancel();
        }

        self.transition(&mut inner, ConnectionState::Closing);

        // The reader might be waiting for the lock to report a fault,
        // so it must not be joined while holding it.
        drop(inner);

        if let Some(session) = session {
            session.shutdown(self.timeouts.close).await;
        }

        let mut inner = self.inner.lock().await;
        self.transition(&mut inner, ConnectionState::Closed);

        ConnectionState::Closed
    }

    async fn wait_while_closing(&self) -> ConnectionState {
        let mut state = self.hub.watch_state();

        while *state.borrow_and_update() == ConnectionState::Closing {
            if state.changed().await.is_err() {
                break;
            }
        }

        self.hub.state()
    }
}

/// Owns at most one device connection and the state machine around it.
///
/// Cheap to clone, all clones refer to the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager which acquires devices through `connector`.
    pub fn new(connector: Arc<dyn Connector>, config: &Config) -> Self {
        let hub = BroadcastHub::new(ConnectionState::Closed, config.subscriber_capacity);

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ConnectionState::Closed,
                    session: None,
                }),
                hub,
                connector,
                timeouts: config.into(),
                active_readers: AtomicUsize::new(0),
            }),
        }
    }

    /// The hub status and data messages are broadcast on.
    pub fn hub(&self) -> &BroadcastHub {
        &self.shared.hub
    }

    /// The current connection state.
    /// Never waits on device I/O.
    pub fn state(&self) -> ConnectionState {
        self.shared.hub.state()
    }

    /// How many reader tasks are running.
    pub fn active_readers(&self) -> usize {
        self.shared.active_readers.load(Ordering::SeqCst)
    }

    async fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().await
    }

    /// Acquire the device at `port` with the given baud rate and start streaming its output.
    ///
    /// Only allowed while closed.
    /// If the device can't be acquired, the state goes back to closed.
    ///
    /// The attempt carries on if this future is dropped, and ends up either open or closed.
    pub async fn open(&self, port: &str, baud: u32) -> Result<Opened, Error> {
        let attempt = tokio::spawn(
            Arc::clone(&self.shared)
                .open(port.into(), baud)
                .in_current_span(),
        );

        attempt
            .await
            .map_err(|e| Error::InternalIssue(format!("Open task failed: {e}")))?
    }

    /// Stop streaming and release the device.
    ///
    /// Always succeeds and always ends up closed.
    /// Closing while closed does nothing.
    /// The close carries on if this future is dropped.
    pub async fn close(&self) -> ConnectionState {
        let closing = tokio::spawn(Arc::clone(&self.shared).close().in_current_span());

        match closing.await {
            Ok(state) => state,
            Err(e) => {
                error!(%e, "Close task failed");
                self.state()
            }
        }
    }

    /// Write a command to the device, followed by a line terminator.
    ///
    /// Returns the number of bytes written, terminator included.
    /// A failing write is a device fault, the state then becomes error.
    pub async fn write(&self, command: &str) -> Result<usize, Error> {
        let mut inner = self.lock().await;

        if inner.state != ConnectionState::Open {
            return Err(Error::NotOpen);
        }

        let session = inner.session.as_mut().ok_or(Error::NotOpen)?;
        let write_timeout = self.shared.timeouts.write;

        let mut buf = BytesMut::with_capacity(session.codec.encoded_len(command));
        session.codec.encode(command, &mut buf)?;

        let written = match timeout(write_timeout, session.writer.write_all(&buf)).await {
            Ok(Ok(())) => match timeout(write_timeout, session.writer.flush()).await {
                Ok(Ok(())) => Ok(buf.len()),
                Ok(Err(e)) => Err(SerialPortError::Io(e)),
                Err(_) => Err(SerialPortError::Timeout(write_timeout)),
            },
            Ok(Err(e)) => Err(SerialPortError::Io(e)),
            Err(_) => Err(SerialPortError::Timeout(write_timeout)),
        };

        match written {
            Ok(n) => {
                debug!(bytes = n, "Wrote");
                Ok(n)
            }
            Err(e) => {
                error!(%e, "Write failed");

                let session = self.shared.fail(&mut inner);
                drop(inner);

                if let Some(session) = session {
                    session.shutdown(self.shared.timeouts.close).await;
                }

                Err(e.into())
            }
        }
    }
}
