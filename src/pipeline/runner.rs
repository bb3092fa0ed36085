//! Pipeline construction and execution
//!
//! Steps run strictly in listed order, each awaited to completion. The
//! first failure aborts the remaining steps and routes to the error
//! handler; exactly one response is produced per request.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::connection::{Capability, Connection, RawRequest, Response};
use crate::errors::{error_response, PipelineError};

use super::step::{Flow, Step, Terminal};

/// Rejected pipeline construction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComposeError {
    /// A step reads a capability no earlier step provides.
    #[error("step `{step}` requires capability `{capability}` that no earlier step provides")]
    MissingCapability {
        step: String,
        capability: Capability,
    },

    /// The terminal handler reads a capability no step provides.
    #[error("terminal `{terminal}` requires capability `{capability}` that no step provides")]
    TerminalMissingCapability {
        terminal: String,
        capability: Capability,
    },
}

/// An ordered sequence of steps plus a terminal handler.
pub struct Pipeline {
    steps: Vec<Arc<dyn Step>>,
    terminal: Arc<dyn Terminal>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field(
                "steps",
                &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("terminal", &self.terminal.name())
            .finish()
    }
}

/// Builder validating capability compatibility at construction time.
///
/// This is the runtime replacement for a static "used `user` before
/// `requires_login` ran" check: a misordered pipeline is rejected here,
/// before any request flows through it.
#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<Arc<dyn Step>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Finish with the terminal handler, checking the capability chain.
    pub fn terminal(self, terminal: impl Terminal + 'static) -> Result<Pipeline, ComposeError> {
        let mut available: HashSet<Capability> = HashSet::new();
        for step in &self.steps {
            for cap in step.requires() {
                if !available.contains(cap) {
                    return Err(ComposeError::MissingCapability {
                        step: step.name().to_string(),
                        capability: *cap,
                    });
                }
            }
            available.extend(step.provides().iter().copied());
        }
        for cap in terminal.requires() {
            if !available.contains(cap) {
                return Err(ComposeError::TerminalMissingCapability {
                    terminal: terminal.name().to_string(),
                    capability: *cap,
                });
            }
        }
        Ok(Pipeline {
            steps: self.steps,
            terminal: Arc::new(terminal),
        })
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Handle one request. Total: always produces exactly one response.
    pub async fn handle(&self, raw: &RawRequest) -> Response {
        let conn = Connection::from_raw(raw);
        match self.run(conn).await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(error = %err, status = err.status_code(), "pipeline failed");
                error_response(err)
            }
        }
    }

    /// Run the steps and terminal over an existing connection.
    ///
    /// Exposed so callers can split a pipeline: running `[a, b, c]` is
    /// equivalent to running `a` and feeding its output to `[b, c]`.
    pub async fn run(&self, mut conn: Connection) -> Result<Response, PipelineError> {
        for step in &self.steps {
            for cap in step.requires() {
                if !conn.has(*cap) {
                    error!(
                        step = step.name(),
                        capability = %cap,
                        "capability missing at runtime despite compose-time check"
                    );
                    return Err(PipelineError::internal(format!(
                        "capability `{}` missing before step `{}`",
                        cap,
                        step.name()
                    )));
                }
            }
            debug!(step = step.name(), "running pipeline step");
            match step.run(conn).await? {
                Flow::Continue(next) => conn = next,
                Flow::Halt(resp) => {
                    debug!(step = step.name(), status = resp.status_code, "step halted pipeline");
                    return Ok(resp);
                }
            }
        }
        self.terminal.respond(conn).await
    }
}
