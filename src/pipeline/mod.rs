//! Execution pipeline
//!
//! Composes an ordered list of async steps plus a terminal handler into
//! a single request handler with typed short-circuiting.

pub mod runner;
pub mod step;

pub use runner::{ComposeError, Pipeline, PipelineBuilder};
pub use step::{BoxFuture, Flow, FnStep, FnTerminal, Step, StepResult, Terminal};
