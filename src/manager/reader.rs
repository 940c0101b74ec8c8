use std::sync::{atomic::Ordering, Arc};

use futures::StreamExt;
use tokio::{io::ReadHalf, time::timeout};
use tokio_util::{codec::FramedRead, sync::CancellationToken};
use tracing::{debug, trace, warn};

use super::Shared;
use crate::{
    device::SerialIo,
    events::{now_ts, OutboundMessage},
    serial::{codecs::lines::LinesCodec, error::SerialPortError, SerialLine},
};

pub(super) type DeviceLines = FramedRead<ReadHalf<Box<dyn SerialIo>>, LinesCodec>;

/// Counts as an active reader from creation until dropped,
/// even if the task it is handed to never gets to run.
pub(super) struct ActiveReader(Arc<Shared>);

impl ActiveReader {
    pub(super) fn new(shared: Arc<Shared>) -> Self {
        shared.active_readers.fetch_add(1, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for ActiveReader {
    fn drop(&mut self) {
        self.0.active_readers.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Read {
    Line(SerialLine),
    Nothing,
    Fault(SerialPortError),
}

async fn read_line(lines: &mut DeviceLines, shared: &Shared) -> Read {
    match timeout(shared.timeouts.read, lines.next()).await {
        Ok(Some(Ok(line))) => Read::Line(line),
        Ok(Some(Err(e))) => Read::Fault(e),
        Ok(None) => Read::Fault(SerialPortError::Disconnected),
        Err(_) => {
            // No delimiter in time. Whatever arrived so far goes out as is.
            let mut pending = lines.read_buffer_mut().split();

            match lines.decoder_mut().take_partial(&mut pending) {
                Some(line) => Read::Line(line),
                None => Read::Nothing,
            }
        }
    }
}

/// Stream lines from the device to the hub until the session is cancelled or the device fails.
pub(super) async fn run(active: ActiveReader, mut lines: DeviceLines, cancel: CancellationToken) {
    let shared = &*active.0;
    debug!("Reader started");

    let mut last_ts = 0.0_f64;

    let fault = loop {
        let read = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("Reader cancelled");
                return;
            }

            read = read_line(&mut lines, shared) => read,
        };

        match read {
            Read::Line(line) => {
                let ts = now_ts().max(last_ts);
                last_ts = ts;

                trace!(%line, "Line");
                shared
                    .hub
                    .broadcast_from_session(OutboundMessage::data(line, ts), &cancel);
            }
            Read::Nothing => continue,
            Read::Fault(e) => break e,
        }
    };

    warn!(%fault, "Device fault");
    drop(lines);

    let mut inner = shared.inner.lock().await;

    // Someone else ended the session while we were failing, they own the cleanup.
    if cancel.is_cancelled() {
        debug!("Session already over");
        return;
    }

    // The session's join handle refers to this task, so it's dropped rather than joined.
    drop(shared.fail(&mut inner));
}
