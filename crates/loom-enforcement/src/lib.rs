pub mod enforcer;
pub mod expr;
pub mod extraction;

pub use enforcer::{to_expr_value, Enforcer};
pub use expr::{EvalError, Value};
