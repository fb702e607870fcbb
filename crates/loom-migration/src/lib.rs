//! JIT scenario migration (§4.5): reconciles a session's remembered
//! scenario step against a newer published version before a turn's
//! `TurnContext` is built, dispatching CLEAN_GRAFT / GAP_FILL / RE_ROUTE
//! per `AnchorTransformation`, chaining multi-hop gaps through
//! [`composite::CompositeMapper`], and falling back to content-hash
//! matching when no plan covers the gap.

pub mod composite;
pub mod diff;
pub mod executor;
pub mod field_resolver;

pub use composite::CompositeMapper;
pub use diff::{compute_scenario_checksum, compute_step_content_hash};
pub use executor::MigrationExecutor;
pub use field_resolver::{GapFillResult, GapFillSource, MissingFieldResolver, NO_CONFIRM_THRESHOLD, USE_THRESHOLD};
