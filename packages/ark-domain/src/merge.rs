use serde_json::Value;

use crate::filter::FilterExpr;
use ark_config::{ControlMode, MergeStrategy};

/// Resolves the filter a metadata search actually runs with.
///
/// `agent` mode ignores the caller, `external` mode ignores the model, and `collaborative` mode
/// combines both by `strategy`. When only one side is present it is returned as is.
pub fn merge(
	agent: Option<FilterExpr>,
	external: Option<FilterExpr>,
	mode: ControlMode,
	strategy: MergeStrategy,
) -> Option<FilterExpr> {
	match mode {
		ControlMode::Agent => agent,
		ControlMode::External => external,
		ControlMode::Collaborative => match (agent, external) {
			(None, None) => None,
			(Some(agent), None) => Some(agent),
			(None, Some(external)) => Some(external),
			(Some(agent), Some(external)) => Some(match strategy {
				MergeStrategy::MergeAnd => FilterExpr::And(vec![external, agent]),
				MergeStrategy::MergeOr => FilterExpr::Or(vec![external, agent]),
				MergeStrategy::AgentPriority => agent,
				MergeStrategy::ExternalPriority => external,
			}),
		},
	}
}

/// Reads one side of a merge. The model sends filters as JSON-encoded strings, callers may send
/// either that or the tree itself. Null and blank input are absent; parse failures are returned so
/// the caller can log them before treating the side as absent.
pub fn parse_filter_value(raw: &Value) -> Result<Option<FilterExpr>, crate::FilterParseError> {
	match raw {
		Value::Null => Ok(None),
		Value::String(text) if text.trim().is_empty() => Ok(None),
		Value::String(text) => FilterExpr::parse_str(text).map(Some),
		other => FilterExpr::parse(other).map(Some),
	}
}
