//! Filter expressions over document metadata: the strict wire parser, the SQL compiler, and the
//! agent/caller merge rules.

pub mod compile;
pub mod filter;
pub mod merge;

pub use compile::{CompiledPredicate, compile, compile_value};
pub use filter::{
	FieldPredicate, FilterExpr, FilterParseError, Operand, Operator, PathPredicate, Scalar,
};
pub use merge::{merge, parse_filter_value};
