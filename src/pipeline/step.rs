//! Step and terminal traits
//!
//! A step consumes a connection and yields an explicit tagged outcome:
//! proceed with an enriched connection, halt with a response, or fail
//! with a typed error. Unwinding is never used for control flow.

use std::future::Future;
use std::pin::Pin;

use crate::connection::{Capability, Connection, Response};
use crate::errors::PipelineError;

/// Boxed future used throughout the pipeline.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a successful step.
#[derive(Debug)]
pub enum Flow {
    /// Continue with the (possibly enriched) connection.
    Continue(Connection),
    /// Emit this response without running later steps or the terminal.
    Halt(Response),
}

/// What a step resolves to.
pub type StepResult = Result<Flow, PipelineError>;

/// One async transformation in the pipeline.
pub trait Step: Send + Sync {
    /// Name used in logs and compose errors.
    fn name(&self) -> &str;

    /// Capability slots this step reads. Checked at pipeline
    /// construction and re-asserted before the step runs.
    fn requires(&self) -> &[Capability] {
        &[]
    }

    /// Capability slots this step attaches on success.
    fn provides(&self) -> &[Capability] {
        &[]
    }

    fn run(&self, conn: Connection) -> BoxFuture<'_, StepResult>;
}

/// The handler that produces the response once every step succeeded.
pub trait Terminal: Send + Sync {
    fn name(&self) -> &str;

    fn requires(&self) -> &[Capability] {
        &[]
    }

    fn respond(&self, conn: Connection) -> BoxFuture<'_, Result<Response, PipelineError>>;
}

type BoxedStepFn = Box<dyn Fn(Connection) -> BoxFuture<'static, StepResult> + Send + Sync>;

/// Closure adapter for `Step`.
pub struct FnStep {
    name: String,
    requires: Vec<Capability>,
    provides: Vec<Capability>,
    f: BoxedStepFn,
}

impl FnStep {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            requires: Vec::new(),
            provides: Vec::new(),
            f: Box::new(move |conn| Box::pin(f(conn))),
        }
    }

    pub fn requiring(mut self, caps: &[Capability]) -> Self {
        self.requires.extend_from_slice(caps);
        self
    }

    pub fn providing(mut self, caps: &[Capability]) -> Self {
        self.provides.extend_from_slice(caps);
        self
    }
}

impl Step for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> &[Capability] {
        &self.requires
    }

    fn provides(&self) -> &[Capability] {
        &self.provides
    }

    fn run(&self, conn: Connection) -> BoxFuture<'_, StepResult> {
        (self.f)(conn)
    }
}

type BoxedTerminalFn =
    Box<dyn Fn(Connection) -> BoxFuture<'static, Result<Response, PipelineError>> + Send + Sync>;

/// Closure adapter for `Terminal`.
pub struct FnTerminal {
    name: String,
    requires: Vec<Capability>,
    f: BoxedTerminalFn,
}

impl FnTerminal {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, PipelineError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            requires: Vec::new(),
            f: Box::new(move |conn| Box::pin(f(conn))),
        }
    }

    pub fn requiring(mut self, caps: &[Capability]) -> Self {
        self.requires.extend_from_slice(caps);
        self
    }
}

impl Terminal for FnTerminal {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> &[Capability] {
        &self.requires
    }

    fn respond(&self, conn: Connection) -> BoxFuture<'_, Result<Response, PipelineError>> {
        (self.f)(conn)
    }
}
