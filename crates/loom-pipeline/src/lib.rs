//! The twelve-phase turn pipeline (§4.1, §4.3): variable resolution,
//! hybrid rule retrieval, LLM-judged filtering and scenario navigation,
//! abstract tool execution, template-precedence response generation,
//! and the orchestrator tying every phase to `loom-repositories`,
//! `loom-providers`, `loom-enforcement`, `loom-migration`,
//! `loom-memory`, and `loom-concurrency`.

pub mod filtering;
pub mod generation;
pub mod orchestrator;
pub mod retrieval;
pub mod tool;
pub mod variables;

pub use generation::{generate, fallback_text, GenerationInput, GenerationOutcome};
pub use orchestrator::Pipeline;
pub use retrieval::{retrieve_candidates, ScoredRule};
pub use tool::{ToolExecutor, ToolHandler, ToolOutcome};
