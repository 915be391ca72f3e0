//! Weave - workflow compiler and template-resolving execution runtime
//!
//! A workflow IR (JSON or YAML) is validated for data flow, compiled into a
//! graph of wrapped units and walked one step at a time. Steps exchange data
//! through a shared context and `${...}` templates.

pub mod compiler;
pub mod config;
pub mod context;
pub mod dataflow;
pub mod error;
pub mod executor;
pub mod ir;
pub mod nodes;
pub mod policy;
pub mod registry;
pub mod subworkflow;
pub mod template;
pub mod types;
pub mod wrappers;

pub use compiler::{compile, CompileOptions, CompiledWorkflow};
pub use config::RuntimeLimits;
pub use context::{CallFrame, ExecutionContext};
pub use dataflow::{execution_order, DataFlowError};
pub use error::{CompilationError, CompilePhase, ErrorCategory, FixSuggestion, WeaveError};
pub use executor::{execute, run_workflow, ExecutionResult, RunError, RunStatus, RunWarning};
pub use ir::WorkflowIr;
pub use nodes::{Node, NodeError, NodeOutput, Params};
pub use policy::{ResolutionPolicy, TemplateMode};
pub use registry::{InterfaceField, NodeInterface, Registry};
pub use subworkflow::StorageMode;
pub use types::SemanticType;
