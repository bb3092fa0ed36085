//! flowline - typed, composable request pipelines
//!
//! An incoming request becomes an immutable [`Connection`] flowing
//! through an ordered sequence of async [`Step`]s. Each step may attach
//! capabilities (authenticated user, loaded row, item id), fail with a
//! typed [`PipelineError`], or produce the final [`Response`]. A
//! generic [`Resource`] factory generates ownership-checked CRUD steps
//! over any table, and the [`bridge`] module adapts callback-style
//! legacy middleware into the pipeline.
//!
//! [`Connection`]: connection::Connection
//! [`Step`]: pipeline::Step
//! [`PipelineError`]: errors::PipelineError
//! [`Response`]: connection::Response
//! [`Resource`]: resource::Resource

pub mod bridge;
pub mod connection;
pub mod errors;
pub mod notify;
pub mod pipeline;
pub mod resource;
pub mod transport;

pub use bridge::{AuthExchange, Continuation, LegacyAuthenticator, RequiresLogin, SinkHandle};
pub use connection::{
    AuthUser, Body, Capability, Connection, Criterion, ItemId, RawRequest, Response,
};
pub use errors::{error_response, PipelineError};
pub use notify::{MockNotifier, Notification, Notifier, NotifyTerminal};
pub use pipeline::{
    ComposeError, Flow, FnStep, FnTerminal, Pipeline, PipelineBuilder, Step, Terminal,
};
pub use resource::{
    BodySchema, FieldDef, FieldType, MemoryStore, OwnershipGuard, Resource, ResourceOptions,
    RowStore,
};
