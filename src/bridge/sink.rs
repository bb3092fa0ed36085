//! Response sink
//!
//! The write target handed to a legacy middleware. Setting a status or
//! header is just buffered; only `end` fires the termination signal the
//! bridge races against.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::debug;

use crate::connection::Response;

use super::SettleOrder;

#[derive(Debug, Default)]
struct SinkState {
    status: Option<u16>,
    headers: HashMap<String, String>,
    body: String,
    ended: bool,
}

/// Bridge-side view of the sink. Holds the termination signal receiver
/// and reads the captured response after the race settles.
pub struct ResponseSink {
    state: Arc<Mutex<SinkState>>,
    ended_rx: oneshot::Receiver<()>,
}

/// Middleware-side handle. Cloneable so a legacy middleware can move it
/// into spawned work.
#[derive(Clone)]
pub struct SinkHandle {
    state: Arc<Mutex<SinkState>>,
    ended_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    order: SettleOrder,
}

impl ResponseSink {
    pub(crate) fn new(order: SettleOrder) -> (ResponseSink, SinkHandle) {
        let state = Arc::new(Mutex::new(SinkState::default()));
        let (tx, rx) = oneshot::channel();
        let sink = ResponseSink {
            state: state.clone(),
            ended_rx: rx,
        };
        let handle = SinkHandle {
            state,
            ended_tx: Arc::new(Mutex::new(Some(tx))),
            order,
        };
        (sink, handle)
    }

    /// The termination signal. Completes with `Ok(())` once `end` is
    /// called; errors if every handle was dropped without ending.
    pub(crate) fn ended_signal(&mut self) -> &mut oneshot::Receiver<()> {
        &mut self.ended_rx
    }

    /// Whether the sink has been ended.
    pub fn is_ended(&self) -> bool {
        self.state.lock().unwrap().ended
    }

    /// Snapshot of the sink's final status, headers and body.
    pub fn captured(&self) -> Response {
        let state = self.state.lock().unwrap();
        Response {
            status_code: state.status.unwrap_or(200),
            headers: state.headers.clone(),
            body: state.body.clone(),
        }
    }
}

impl SinkHandle {
    /// Buffer a status code. Does not terminate the response.
    pub fn set_status(&self, status: u16) {
        let mut state = self.state.lock().unwrap();
        if !state.ended {
            state.status = Some(status);
        }
    }

    /// Buffer a header. Does not terminate the response.
    pub fn set_header(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        if !state.ended {
            state.headers.insert(key.into(), value.into());
        }
    }

    /// Append to the body. Does not terminate the response.
    pub fn write(&self, chunk: &str) {
        let mut state = self.state.lock().unwrap();
        if !state.ended {
            state.body.push_str(chunk);
        }
    }

    /// Terminate the response. The only call that resolves the bridge's
    /// "sink ended" signal. Idempotent.
    pub fn end(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.ended {
                debug!("sink end called twice; ignoring");
                return;
            }
            state.ended = true;
        }
        self.order.record_ended();
        if let Some(tx) = self.ended_tx.lock().unwrap().take() {
            // The receiver may already be gone if the continuation won
            // the race; that is fine.
            let _ = tx.send(());
        }
    }

    /// Set status and body, then terminate.
    pub fn end_with(&self, status: u16, body: &str) {
        self.set_status(status);
        self.write(body);
        self.end();
    }
}
