//! In-memory devices, useful to exercise the relay without serial hardware.
//!
//! A [`MockConnector`] knows a set of named ports.
//! Each time the relay opens one of them, the device side of the connection
//! is handed out through the corresponding [`MockPort`] as a [`MockDevice`].
//! The device side can then produce output, read what the relay wrote,
//! or be unplugged.

use std::{
    collections::HashMap,
    io,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError, Weak},
    task::{Context, Poll},
};

use futures::future::BoxFuture;
use tokio::{
    io::{
        AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream, DuplexStream, ReadBuf,
    },
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, info_span, trace, Instrument};

use crate::{
    device::{Connector, DeviceSettings, SerialIo},
    serial::error::SerialPortError,
};

/// How many bytes may be in flight in each direction.
const DUPLEX_CAPACITY: usize = 64 * 1024;

struct MockPortSlot {
    devices: mpsc::UnboundedSender<MockDevice>,

    // Alive as long as the relay holds the host side.
    lease: Weak<()>,
}

/// Hands out in-memory devices in place of serial ports.
#[derive(Clone, Default)]
pub struct MockConnector {
    ports: Arc<Mutex<HashMap<String, MockPortSlot>>>,
}

impl MockConnector {
    /// A connector without any ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a port with the given name available.
    /// Replaces any port with the same name.
    pub fn add_port(&self, name: &str) -> MockPort {
        let (devices_tx, devices_rx) = mpsc::unbounded_channel();

        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                name.into(),
                MockPortSlot {
                    devices: devices_tx,
                    lease: Weak::new(),
                },
            );

        debug!(%name, "Mock port added");

        MockPort {
            name: name.into(),
            devices: devices_rx,
        }
    }

    fn try_connect(&self, settings: &DeviceSettings) -> Result<Box<dyn SerialIo>, SerialPortError> {
        let mut ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);

        let slot = ports
            .get_mut(&settings.port)
            .ok_or_else(|| SerialPortError::NoSuchPort(settings.port.clone()))?;

        if slot.lease.upgrade().is_some() {
            return Err(SerialPortError::Busy(settings.port.clone()));
        }

        let (host, device) = tokio::io::duplex(DUPLEX_CAPACITY);

        let lease = Arc::new(());
        slot.lease = Arc::downgrade(&lease);

        if slot.devices.send(MockDevice::new(settings, device)).is_err() {
            // Nobody will ever produce output or read input, the device is effectively unplugged.
            debug!(%settings, "Mock device has no owner");
        }

        info!(%settings, "Mock device connected");

        Ok(Box::new(MockStream {
            inner: host,
            _lease: lease,
        }))
    }
}

impl Connector for MockConnector {
    fn connect(
        &self,
        settings: &DeviceSettings,
    ) -> BoxFuture<'static, Result<Box<dyn SerialIo>, SerialPortError>> {
        let result = self.try_connect(settings);

        Box::pin(async move { result })
    }
}

/// A named mock port.
/// Yields the device side of each connection made to it.
pub struct MockPort {
    name: String,
    devices: mpsc::UnboundedReceiver<MockDevice>,
}

impl MockPort {
    /// Wait for the relay to connect, returning the device side.
    pub async fn next_device(&mut self) -> Option<MockDevice> {
        self.devices.recv().await
    }

    /// The name of the port.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Echo every line written to this port back, for every connection made.
    pub fn loopback_forever(mut self) -> JoinHandle<()> {
        let span = info_span!("mock", port = %self.name);

        tokio::spawn(
            async move {
                while let Some(device) = self.next_device().await {
                    // Wait for the device to go away before accepting the next connection.
                    if let Err(e) = device.loopback().await {
                        debug!(?e, "Loopback task failed");
                    }
                }
            }
            .instrument(span),
        )
    }
}

/// The device side of a mock connection.
pub struct MockDevice {
    settings: DeviceSettings,
    stream: BufStream<DuplexStream>,
}

impl MockDevice {
    fn new(settings: &DeviceSettings, stream: DuplexStream) -> Self {
        Self {
            settings: settings.clone(),
            stream: BufStream::new(stream),
        }
    }

    /// The settings the relay opened this device with.
    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    /// Produce output, as if the device sent these bytes.
    pub async fn emit<B: AsRef<[u8]>>(&mut self, bytes: B) -> io::Result<()> {
        self.stream.write_all(bytes.as_ref()).await?;
        self.stream.flush().await
    }

    /// Read a line the relay wrote to the device, terminator included.
    /// An empty string means the relay released the device.
    pub async fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        self.stream.read_line(&mut line).await?;

        Ok(line)
    }

    /// Simulate pulling the cable.
    pub fn unplug(self) {
        info!(settings = %self.settings, "Mock device unplugged");
    }

    /// Echo every written line back until the relay releases the device.
    pub fn loopback(mut self) -> JoinHandle<io::Result<()>> {
        tokio::spawn(async move {
            loop {
                let line = self.read_line().await?;
                if line.is_empty() {
                    debug!(settings = %self.settings, "Mock device released");
                    return Ok(());
                }

                trace!(%line, "Echoing");
                self.emit(line).await?;
            }
        })
    }
}

/// The host side of a mock connection.
struct MockStream {
    inner: DuplexStream,
    _lease: Arc<()>,
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
