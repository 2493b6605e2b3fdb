use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::channel::{self, Sender};
use nodel_frame::{ChannelMessage, FrameConfig, MessageReader, MessageWriter};
use nodel_transport::ChannelStream;
use tracing::{debug, trace};

use crate::error::{ChannelError, PeerError, Result};
use crate::runtime::lock;

type FailureCallback = Box<dyn FnOnce(ChannelError) + Send + 'static>;

#[derive(Default)]
struct FailureState {
    callback: Option<FailureCallback>,
    pending: Option<ChannelError>,
    done: bool,
}

/// Delivers at most one failure, and none after an explicit close.
#[derive(Default)]
struct FailureOnce {
    state: Mutex<FailureState>,
}

impl FailureOnce {
    fn arm(&self, callback: FailureCallback) {
        let mut state = lock(&self.state);
        match state.pending.take() {
            Some(err) => {
                drop(state);
                callback(err);
            }
            None if !state.done => state.callback = Some(callback),
            None => {}
        }
    }

    fn fire(&self, err: ChannelError) {
        let mut state = lock(&self.state);
        if state.done {
            return;
        }
        state.done = true;
        match state.callback.take() {
            Some(callback) => {
                drop(state);
                callback(err);
            }
            None => state.pending = Some(err),
        }
    }

    fn disarm(&self) {
        let mut state = lock(&self.state);
        state.done = true;
        state.callback = None;
        state.pending = None;
    }
}

/// One TCP channel stream with a reader thread and a writer thread.
///
/// `send` only queues, so callers may hold locks while sending. The failure
/// callback runs on the reader or writer thread with no locks held.
pub(crate) struct Connection {
    label: String,
    stream: ChannelStream,
    outbound: Mutex<Option<Sender<ChannelMessage>>>,
    failure: Arc<FailureOnce>,
}

impl Connection {
    /// Start the writer half. Nothing is read until [`Connection::start_reading`].
    pub(crate) fn open(stream: ChannelStream, config: FrameConfig, label: String) -> Result<Arc<Self>> {
        let mut writer = MessageWriter::with_config_stream(stream.try_clone()?, config)?;
        let (tx, rx) = channel::unbounded::<ChannelMessage>();
        let failure = Arc::new(FailureOnce::default());

        let writer_failure = Arc::clone(&failure);
        let writer_label = label.clone();
        thread::Builder::new()
            .name(format!("nodel-write-{label}"))
            .spawn(move || {
                for message in rx.iter() {
                    trace!(peer = %writer_label, kind = ?message.kind(), "sending");
                    if let Err(err) = writer.send(&message) {
                        debug!(peer = %writer_label, error = %err, "write failed");
                        writer.get_ref().shutdown();
                        writer_failure.fire(err.into());
                        return;
                    }
                }
                trace!(peer = %writer_label, "writer finished");
            })
            .map_err(PeerError::Spawn)?;

        Ok(Arc::new(Self {
            label,
            stream,
            outbound: Mutex::new(Some(tx)),
            failure,
        }))
    }

    /// Start the reader half and arm the failure callback.
    pub(crate) fn start_reading(
        &self,
        config: FrameConfig,
        on_message: impl Fn(ChannelMessage) + Send + 'static,
        on_failure: impl FnOnce(ChannelError) + Send + 'static,
    ) -> Result<()> {
        let mut reader = MessageReader::with_config_stream(self.stream.try_clone()?, config)?;
        self.failure.arm(Box::new(on_failure));

        let failure = Arc::clone(&self.failure);
        let label = self.label.clone();
        thread::Builder::new()
            .name(format!("nodel-read-{}", self.label))
            .spawn(move || loop {
                match reader.read_channel_message() {
                    Ok(Some(message)) => on_message(message),
                    Ok(None) => {
                        debug!(peer = %label, "peer closed channel");
                        failure.fire(ChannelError::Closed);
                        return;
                    }
                    Err(err) => {
                        debug!(peer = %label, error = %err, "read failed");
                        failure.fire(err.into());
                        return;
                    }
                }
            })
            .map_err(PeerError::Spawn)?;
        Ok(())
    }

    /// Queue a message. Returns `false` once the connection is closed.
    pub(crate) fn send(&self, message: ChannelMessage) -> bool {
        match lock(&self.outbound).as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Close without reporting a failure.
    pub(crate) fn close(&self) {
        self.failure.disarm();
        lock(&self.outbound).take();
        self.stream.shutdown();
    }
}
