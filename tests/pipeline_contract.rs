//! Pipeline combinator contract: strict ordering, short-circuiting,
//! exactly-one-response, and construction-time capability checking.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flowline::{
    AuthUser, Capability, ComposeError, Connection, Flow, FnStep, FnTerminal, ItemId, Pipeline,
    PipelineError, RawRequest, Response, Step,
};
use serde_json::json;

fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn recording_step(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> FnStep {
    FnStep::new(name, move |conn| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(name);
            Ok(Flow::Continue(conn))
        }
    })
}

fn counting_terminal(counter: Arc<AtomicUsize>) -> FnTerminal {
    FnTerminal::new("terminal", move |_conn| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(200, "done"))
        }
    })
}

#[tokio::test]
async fn test_steps_run_strictly_in_listed_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Pipeline::builder()
        .step(recording_step("a", log.clone()))
        .step(recording_step("b", log.clone()))
        .step(recording_step("c", log.clone()))
        .terminal(counting_terminal(Arc::new(AtomicUsize::new(0))))
        .unwrap();

    pipeline.handle(&RawRequest::new("GET", "/")).await;
    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_composing_abc_equals_a_then_bc() {
    // Steps attach distinct capabilities; the terminal renders all of
    // them, so both routes must produce identical responses.
    let attach_user = || {
        FnStep::new("attach_user", |conn: Connection| async move {
            Ok(Flow::Continue(conn.with_user(AuthUser::new("u1"))))
        })
    };
    let attach_item = || {
        FnStep::new("attach_item", |conn: Connection| async move {
            Ok(Flow::Continue(conn.with_item_id(ItemId("t1".into()))))
        })
    };
    let attach_row = || {
        FnStep::new("attach_row", |conn: Connection| async move {
            Ok(Flow::Continue(conn.with_row(json!({"id": "t1"}))))
        })
    };
    let render = || {
        FnTerminal::new("render", |conn: Connection| async move {
            let user = conn.user().map(|u| u.id.clone()).unwrap_or_default();
            let item = conn.item_id().map(ToString::to_string).unwrap_or_default();
            let row = conn.row().cloned().unwrap_or_default();
            Ok(Response::new(200, format!("{user}/{item}/{row}")))
        })
    };

    let whole = Pipeline::builder()
        .step(attach_user())
        .step(attach_item())
        .step(attach_row())
        .terminal(render())
        .unwrap();
    let full = whole.run(Connection::from_raw(&RawRequest::new("GET", "/"))).await.unwrap();

    let first = attach_user();
    let conn = Connection::from_raw(&RawRequest::new("GET", "/"));
    let Flow::Continue(after_a) = first.run(conn).await.unwrap() else {
        panic!("attach_user must continue");
    };
    let rest = Pipeline::builder()
        .step(attach_item())
        .step(attach_row())
        .terminal(render())
        .unwrap();
    let split = rest.run(after_a).await.unwrap();

    assert_eq!(full, split);
}

#[tokio::test]
async fn test_first_failure_skips_remaining_steps_and_terminal() {
    trace_init();
    let log = Arc::new(Mutex::new(Vec::new()));
    let terminal_runs = Arc::new(AtomicUsize::new(0));

    let failing = FnStep::new("failing", |_conn| async move {
        Err(PipelineError::not_authorized("no"))
    });

    let pipeline = Pipeline::builder()
        .step(recording_step("before", log.clone()))
        .step(failing)
        .step(recording_step("after", log.clone()))
        .terminal(counting_terminal(terminal_runs.clone()))
        .unwrap();

    let resp = pipeline.handle(&RawRequest::new("GET", "/")).await;

    assert_eq!(resp.status_code, 401);
    assert_eq!(*log.lock().unwrap(), vec!["before"]);
    assert_eq!(terminal_runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_terminal_runs_exactly_once_on_success() {
    let terminal_runs = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::builder()
        .terminal(counting_terminal(terminal_runs.clone()))
        .unwrap();

    let resp = pipeline.handle(&RawRequest::new("GET", "/")).await;
    assert_eq!(resp.status_code, 200);
    assert_eq!(terminal_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_terminal_failure_is_routed_to_the_error_handler() {
    trace_init();
    let pipeline = Pipeline::builder()
        .terminal(FnTerminal::new("explodes", |_conn| async move {
            Err::<Response, _>(PipelineError::internal("subsystem down"))
        }))
        .unwrap();

    let resp = pipeline.handle(&RawRequest::new("GET", "/")).await;
    assert_eq!(resp.status_code, 500);
    assert_eq!(resp.body, "an error occurred");
}

#[test]
fn test_misordered_composition_is_rejected_at_construction() {
    let needs_user = FnStep::new("needs_user", |conn| async move {
        Ok(Flow::Continue(conn))
    })
    .requiring(&[Capability::User]);

    let err = Pipeline::builder()
        .step(needs_user)
        .terminal(FnTerminal::new("ok", |_conn| async move {
            Ok(Response::new(200, ""))
        }))
        .unwrap_err();

    assert!(matches!(err, ComposeError::MissingCapability { .. }));
}
