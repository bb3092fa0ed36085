//! Callback bridge
//!
//! Adapts a callback-style legacy middleware (typically authentication)
//! into the pipeline's future-based world. The middleware either
//! invokes its continuation to signal "proceed" or writes directly into
//! a response sink and ends it, intending to short-circuit the whole
//! request. The bridge races those two completion signals with
//! first-settled-wins semantics and tolerates the losing signal
//! arriving later.

pub mod continuation;
pub mod sink;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::connection::{Capability, Connection};
use crate::errors::PipelineError;
use crate::pipeline::{BoxFuture, Flow, Step, StepResult};

pub use continuation::{AuthExchange, Continuation};
pub use sink::{ResponseSink, SinkHandle};

/// A callback-style middleware that either calls the continuation
/// (optionally with an error) or writes a terminal response itself.
///
/// `authenticate` must not block; implementations doing real I/O spawn
/// a task and move the handles into it.
pub trait LegacyAuthenticator: Send + Sync {
    fn authenticate(
        &self,
        conn: &Connection,
        exchange: AuthExchange,
        sink: SinkHandle,
        next: Continuation,
    );
}

const SIGNAL_NONE: u8 = 0;
const SIGNAL_NEXT: u8 = 1;
const SIGNAL_ENDED: u8 = 2;

/// Records which signal fired first. When both signals are already
/// ready at the first poll, `select!` picks a branch in arbitrary
/// order; this cell holds the true arrival order and decides the tie.
#[derive(Clone, Default)]
pub(crate) struct SettleOrder(Arc<AtomicU8>);

impl SettleOrder {
    pub(crate) fn record_next(&self) {
        let _ = self
            .0
            .compare_exchange(SIGNAL_NONE, SIGNAL_NEXT, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub(crate) fn record_ended(&self) {
        let _ = self
            .0
            .compare_exchange(SIGNAL_NONE, SIGNAL_ENDED, Ordering::SeqCst, Ordering::SeqCst);
    }

    fn first(&self) -> u8 {
        self.0.load(Ordering::SeqCst)
    }
}

/// How the race settled.
enum Settled {
    /// Continuation invoked, possibly with an error.
    Next(Option<PipelineError>),
    /// Sink ended before the continuation was ever invoked.
    Ended,
    /// Middleware dropped both signals without deciding.
    Abandoned,
}

/// Run a legacy middleware against the connection.
///
/// Resolves with the connection augmented by whatever principal the
/// middleware attached, raises the middleware's error, or raises
/// `EarlyResponse` with the sink's exact captured content. Setting a
/// header or status on the sink without ending it does not settle the
/// race.
pub async fn bridge(
    conn: Connection,
    authenticator: &dyn LegacyAuthenticator,
) -> Result<Connection, PipelineError> {
    let order = SettleOrder::default();
    let (mut sink, handle) = ResponseSink::new(order.clone());
    let (next, mut called) = Continuation::channel(order.clone());
    let exchange = AuthExchange::default();

    authenticator.authenticate(&conn, exchange.clone(), handle, next);

    let first = tokio::select! {
        res = &mut called => match res {
            Ok(outcome) => Settled::Next(outcome),
            // Continuation dropped without being invoked; the sink is
            // the only signal left.
            Err(_) => match sink.ended_signal().await {
                Ok(()) => Settled::Ended,
                Err(_) => Settled::Abandoned,
            },
        },
        end = sink.ended_signal() => match end {
            Ok(()) => Settled::Ended,
            // Sink handles dropped without ending; only the
            // continuation can settle now.
            Err(_) => match (&mut called).await {
                Ok(outcome) => Settled::Next(outcome),
                Err(_) => Settled::Abandoned,
            },
        },
    };

    // Both signals may have fired before the first poll; the recorded
    // arrival order, not the branch `select!` happened to take, decides.
    let first = match first {
        Settled::Next(_) if order.first() == SIGNAL_ENDED => Settled::Ended,
        Settled::Ended if order.first() == SIGNAL_NEXT => match (&mut called).await {
            Ok(outcome) => Settled::Next(outcome),
            Err(_) => Settled::Ended,
        },
        other => other,
    };

    match first {
        Settled::Next(None) => match exchange.take_user() {
            Some(user) => {
                debug!(user = %user.id, "legacy middleware authenticated");
                Ok(conn.with_user(user))
            }
            None => Err(PipelineError::internal(
                "legacy middleware signalled success without attaching a principal",
            )),
        },
        Settled::Next(Some(err)) => {
            debug!(error = %err, "legacy middleware rejected the request");
            Err(err)
        }
        Settled::Ended => {
            let captured = sink.captured();
            warn!(
                status = captured.status_code,
                "legacy middleware ended the response; short-circuiting"
            );
            Err(PipelineError::EarlyResponse(captured))
        }
        Settled::Abandoned => Err(PipelineError::internal(
            "legacy middleware finished without invoking its continuation or ending the response",
        )),
    }
}

/// Pipeline step running a legacy authenticator through the bridge and
/// attaching the resulting principal.
pub struct RequiresLogin {
    authenticator: Arc<dyn LegacyAuthenticator>,
}

impl RequiresLogin {
    pub fn new(authenticator: Arc<dyn LegacyAuthenticator>) -> Self {
        Self { authenticator }
    }
}

impl Step for RequiresLogin {
    fn name(&self) -> &str {
        "requires_login"
    }

    fn provides(&self) -> &[Capability] {
        &[Capability::User]
    }

    fn run(&self, conn: Connection) -> BoxFuture<'_, StepResult> {
        Box::pin(async move {
            let conn = bridge(conn, self.authenticator.as_ref()).await?;
            Ok(Flow::Continue(conn))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{AuthUser, RawRequest};

    fn conn() -> Connection {
        Connection::from_raw(&RawRequest::new("GET", "/"))
    }

    struct Approves;

    impl LegacyAuthenticator for Approves {
        fn authenticate(
            &self,
            _conn: &Connection,
            exchange: AuthExchange,
            _sink: SinkHandle,
            next: Continuation,
        ) {
            exchange.set_user(AuthUser::new("u1"));
            next.proceed();
        }
    }

    #[tokio::test]
    async fn test_continuation_success_attaches_user() {
        let augmented = bridge(conn(), &Approves).await.unwrap();
        assert_eq!(augmented.user().map(|u| u.id.as_str()), Some("u1"));
    }

    struct Rejects;

    impl LegacyAuthenticator for Rejects {
        fn authenticate(
            &self,
            _conn: &Connection,
            _exchange: AuthExchange,
            _sink: SinkHandle,
            next: Continuation,
        ) {
            next.fail(PipelineError::not_authorized("bad token"));
        }
    }

    #[tokio::test]
    async fn test_continuation_error_is_raised() {
        let err = bridge(conn(), &Rejects).await.unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    struct Redirects;

    impl LegacyAuthenticator for Redirects {
        fn authenticate(
            &self,
            _conn: &Connection,
            _exchange: AuthExchange,
            sink: SinkHandle,
            _next: Continuation,
        ) {
            sink.set_header("location", "/login");
            sink.end_with(302, "Found. Redirecting to /login");
        }
    }

    #[tokio::test]
    async fn test_sink_end_raises_early_response() {
        let err = bridge(conn(), &Redirects).await.unwrap_err();
        match err {
            PipelineError::EarlyResponse(resp) => {
                assert_eq!(resp.status_code, 302);
                assert_eq!(resp.headers.get("location").map(String::as_str), Some("/login"));
                assert_eq!(resp.body, "Found. Redirecting to /login");
            }
            other => panic!("expected EarlyResponse, got {:?}", other),
        }
    }

    struct ApprovesWithoutPrincipal;

    impl LegacyAuthenticator for ApprovesWithoutPrincipal {
        fn authenticate(
            &self,
            _conn: &Connection,
            _exchange: AuthExchange,
            _sink: SinkHandle,
            next: Continuation,
        ) {
            next.proceed();
        }
    }

    #[tokio::test]
    async fn test_success_without_principal_is_internal() {
        let err = bridge(conn(), &ApprovesWithoutPrincipal).await.unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    struct DoesNothing;

    impl LegacyAuthenticator for DoesNothing {
        fn authenticate(
            &self,
            _conn: &Connection,
            _exchange: AuthExchange,
            _sink: SinkHandle,
            _next: Continuation,
        ) {
        }
    }

    #[tokio::test]
    async fn test_abandoned_signals_fail_instead_of_hanging() {
        let err = bridge(conn(), &DoesNothing).await.unwrap_err();
        assert_eq!(err.status_code(), 500);
    }
}
