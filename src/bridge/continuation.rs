//! Continuation and auth side channel
//!
//! The callback a legacy middleware invokes to signal "proceed". It
//! settles at most once; late or duplicate invocations are observed and
//! ignored so a sloppy middleware cannot double-resolve the race.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::debug;

use crate::connection::AuthUser;
use crate::errors::PipelineError;

use super::SettleOrder;

/// At-most-once "proceed" callback handed to a legacy middleware.
#[derive(Clone)]
pub struct Continuation {
    tx: Arc<Mutex<Option<oneshot::Sender<Option<PipelineError>>>>>,
    order: SettleOrder,
}

impl Continuation {
    pub(crate) fn channel(
        order: SettleOrder,
    ) -> (Continuation, oneshot::Receiver<Option<PipelineError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Continuation {
                tx: Arc::new(Mutex::new(Some(tx))),
                order,
            },
            rx,
        )
    }

    /// Signal "proceed". Equivalent to calling an express-style `next()`
    /// with no argument.
    pub fn proceed(&self) {
        self.settle(None);
    }

    /// Signal "proceed with an error".
    pub fn fail(&self, err: PipelineError) {
        self.settle(Some(err));
    }

    fn settle(&self, outcome: Option<PipelineError>) {
        match self.tx.lock().unwrap().take() {
            Some(tx) => {
                self.order.record_next();
                // The receiver is gone when the sink already won the
                // race; a late continuation is ignored, not an error.
                let _ = tx.send(outcome);
            }
            None => debug!("continuation invoked after it already settled; ignoring"),
        }
    }
}

/// Side channel a legacy middleware uses to attach the authenticated
/// principal, mirroring middleware that mutates its request object.
#[derive(Clone, Default)]
pub struct AuthExchange {
    user: Arc<Mutex<Option<AuthUser>>>,
}

impl AuthExchange {
    pub fn set_user(&self, user: AuthUser) {
        *self.user.lock().unwrap() = Some(user);
    }

    pub(crate) fn take_user(&self) -> Option<AuthUser> {
        self.user.lock().unwrap().take()
    }
}
