//! End-to-end ownership scenarios: legacy auth through the bridge, the
//! ownership guard in front of mutations and custom actions, and the
//! notification collaborator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flowline::bridge::{AuthExchange, Continuation, LegacyAuthenticator, SinkHandle};
use flowline::resource::{decode_body, item_id_from_path, respond_row};
use flowline::{
    AuthUser, BodySchema, Capability, Connection, FieldDef, FieldType, Flow, FnStep, MemoryStore,
    MockNotifier, Notification, NotifyTerminal, OwnershipGuard, Pipeline, RawRequest, RequiresLogin,
    Resource, ResourceOptions,
};
use serde_json::{json, Value};

/// Bearer-token authenticator over a fixed token table. Unknown tokens
/// get a login redirect written straight into the sink, the way the
/// legacy middleware behaves in production.
struct TokenAuth {
    tokens: HashMap<String, String>,
}

impl TokenAuth {
    fn with_users(users: &[(&str, &str)]) -> Self {
        Self {
            tokens: users
                .iter()
                .map(|(token, user)| (token.to_string(), user.to_string()))
                .collect(),
        }
    }
}

impl LegacyAuthenticator for TokenAuth {
    fn authenticate(
        &self,
        conn: &Connection,
        exchange: AuthExchange,
        sink: SinkHandle,
        next: Continuation,
    ) {
        let token = conn
            .headers
            .get("authorization")
            .and_then(|h| h.strip_prefix("Bearer "));
        match token.and_then(|t| self.tokens.get(t)) {
            Some(user_id) => {
                exchange.set_user(AuthUser::new(user_id.clone()));
                next.proceed();
            }
            None => {
                sink.set_header("location", "/login");
                sink.end_with(302, "Found. Redirecting to /login");
            }
        }
    }
}

fn tickets(store: Arc<MemoryStore>) -> Resource {
    Resource::new(
        store,
        ResourceOptions::new("ticket").with_owner_column("purchaser_id"),
    )
}

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed(
        "ticket",
        json!({
            "id": "t1",
            "purchaser_id": "u1",
            "purchaser_email": "owner@example.com",
            "event": "RustConf"
        }),
    );
    store
}

fn auth() -> Arc<TokenAuth> {
    Arc::new(TokenAuth::with_users(&[
        ("owner-token", "u1"),
        ("other-token", "u2"),
    ]))
}

// POST /tickets/:ticketId/remind
fn remind_pipeline(store: Arc<MemoryStore>, notifier: Arc<MockNotifier>) -> Pipeline {
    let resource = tickets(store);
    Pipeline::builder()
        .step(RequiresLogin::new(auth()))
        .step(item_id_from_path("ticketId"))
        .step(OwnershipGuard::for_resource(&resource))
        .step(resource.get())
        .terminal(
            NotifyTerminal::new(notifier, "sent", |conn| {
                let row = conn.row().cloned().unwrap_or_default();
                Notification::Reminder {
                    to: row["purchaser_email"].as_str().unwrap_or_default().to_string(),
                    subject: "Ticket reminder".to_string(),
                    body: format!("Reminder for {}", row["event"]),
                }
            })
            .requiring(&[Capability::Row]),
        )
        .unwrap()
}

fn remind_request(token: &str) -> RawRequest {
    RawRequest::new("POST", "/tickets/t1/remind")
        .with_param("ticketId", "t1")
        .with_header("authorization", format!("Bearer {token}"))
}

// Scenario A: action request from a non-owning authenticated user.
#[tokio::test]
async fn test_non_owner_action_is_401_with_no_side_effects() {
    let store = seeded_store();
    let notifier = Arc::new(MockNotifier::new());
    let pipeline = remind_pipeline(store, notifier.clone());

    let resp = pipeline.handle(&remind_request("other-token")).await;

    assert_eq!(resp.status_code, 401);
    assert_eq!(resp.body, "you must own this ticket to take that action");
    assert_eq!(notifier.sent_count(), 0);
}

// Scenario B: same action from the owner.
#[tokio::test]
async fn test_owner_action_sends_exactly_one_notification() {
    let store = seeded_store();
    let notifier = Arc::new(MockNotifier::new());
    let pipeline = remind_pipeline(store, notifier.clone());

    let resp = pipeline.handle(&remind_request("owner-token")).await;

    assert_eq!(resp.status_code, 200);
    assert_eq!(resp.body, r#"{"message":"sent"}"#);
    assert_eq!(notifier.sent_count(), 1);
    match &notifier.sent()[0] {
        Notification::Reminder { to, .. } => assert_eq!(to, "owner@example.com"),
    }
}

// PATCH /tickets/:id
fn update_pipeline(store: Arc<MemoryStore>) -> Pipeline {
    let resource = tickets(store);
    let schema = BodySchema::new(vec![FieldDef::optional("event", FieldType::String)]);
    Pipeline::builder()
        .step(RequiresLogin::new(auth()))
        .step(item_id_from_path("id"))
        .step(OwnershipGuard::for_resource(&resource))
        .step(decode_body(schema))
        .step(resource.update())
        .terminal(respond_row())
        .unwrap()
}

fn update_request(token: &str) -> RawRequest {
    RawRequest::new("PATCH", "/tickets/t1")
        .with_param("id", "t1")
        .with_header("authorization", format!("Bearer {token}"))
        .with_body(json!({"event": "RustConf EU"}))
}

// Scenario C: update by the owner succeeds; by a non-owner the store's
// update operation is never invoked.
#[tokio::test]
async fn test_owner_update_succeeds_and_non_owner_update_never_reaches_the_store() {
    let store = seeded_store();
    let pipeline = update_pipeline(store.clone());

    let resp = pipeline.handle(&update_request("owner-token")).await;
    assert_eq!(resp.status_code, 200);
    let body: Value = serde_json::from_str(&resp.body).unwrap();
    assert_eq!(body["row"]["event"], "RustConf EU");
    assert_eq!(store.calls.update(), 1);

    let resp = pipeline.handle(&update_request("other-token")).await;
    assert_eq!(resp.status_code, 401);
    assert_eq!(store.calls.update(), 1);
}

// Scenario E: the authentication collaborator short-circuits with a
// redirect; the pipeline emits exactly that response and nothing after
// the auth step runs.
#[tokio::test]
async fn test_unauthenticated_request_emits_the_captured_redirect() {
    let store = seeded_store();
    let later_steps = Arc::new(AtomicUsize::new(0));

    let resource = tickets(store);
    let counter = later_steps.clone();
    let counting = FnStep::new("counting", move |conn| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Flow::Continue(conn))
        }
    });

    let pipeline = Pipeline::builder()
        .step(RequiresLogin::new(auth()))
        .step(counting)
        .step(item_id_from_path("id"))
        .step(resource.get())
        .terminal(respond_row())
        .unwrap();

    let resp = pipeline
        .handle(&RawRequest::new("PATCH", "/tickets/t1").with_param("id", "t1"))
        .await;

    assert_eq!(resp.status_code, 302);
    assert_eq!(resp.headers.get("location").map(String::as_str), Some("/login"));
    assert_eq!(resp.body, "Found. Redirecting to /login");
    assert_eq!(later_steps.load(Ordering::SeqCst), 0);
}

// The guard does not reveal whether the row exists: missing rows and
// wrong owners produce the same 401.
#[tokio::test]
async fn test_missing_row_and_wrong_owner_are_indistinguishable() {
    let store = seeded_store();
    let notifier = Arc::new(MockNotifier::new());
    let pipeline = remind_pipeline(store, notifier);

    let wrong_owner = pipeline.handle(&remind_request("other-token")).await;
    let missing = pipeline
        .handle(
            &RawRequest::new("POST", "/tickets/ghost/remind")
                .with_param("ticketId", "ghost")
                .with_header("authorization", "Bearer other-token"),
        )
        .await;

    assert_eq!(wrong_owner.status_code, 401);
    assert_eq!(missing.status_code, 401);
    assert_eq!(wrong_owner.body, missing.body);
}
