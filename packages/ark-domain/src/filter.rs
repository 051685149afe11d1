use std::fmt::{Display, Formatter};

use serde_json::{Map, Number, Value};

use ark_config::MetadataOrigin;

pub const MAX_FILTER_DEPTH: usize = 8;
pub const MAX_FILTER_NODES: usize = 128;
pub const MAX_IN_LIST_ITEMS: usize = 128;
pub const MAX_STRING_BYTES: usize = 512;

const ROOT_PATH: &str = "$.filter";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterParseError {
	path: String,
	message: String,
}
impl FilterParseError {
	fn new(path: &str, message: impl Into<String>) -> Self {
		Self { path: path.to_string(), message: message.into() }
	}

	pub fn path(&self) -> &str {
		&self.path
	}
}
impl Display for FilterParseError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}: {}", self.path, self.message)
	}
}
impl std::error::Error for FilterParseError {}

/// A boolean predicate tree over document metadata.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterExpr {
	And(Vec<FilterExpr>),
	Or(Vec<FilterExpr>),
	Not(Box<FilterExpr>),
	Field(FieldPredicate),
	Path(PathPredicate),
}
impl FilterExpr {
	/// Parses the JSON-encoded wire form, e.g. the `filter` string argument of a tool call.
	pub fn parse_str(raw: &str) -> Result<Self, FilterParseError> {
		let value: Value = serde_json::from_str(raw)
			.map_err(|err| FilterParseError::new(ROOT_PATH, format!("invalid JSON: {err}.")))?;

		Self::parse(&value)
	}

	pub fn parse(raw: &Value) -> Result<Self, FilterParseError> {
		let mut state = FilterParseState::default();

		parse_expr(raw, ROOT_PATH, 1, &mut state)
	}

	/// Canonical wire form. `like` is rendered as `contains` and bare lists as explicit `and`.
	pub fn to_value(&self) -> Value {
		match self {
			Self::And(children) => {
				let children = children.iter().map(Self::to_value).collect::<Vec<_>>();

				serde_json::json!({ "and": children })
			},
			Self::Or(children) => {
				let children = children.iter().map(Self::to_value).collect::<Vec<_>>();

				serde_json::json!({ "or": children })
			},
			Self::Not(child) => serde_json::json!({ "not": child.to_value() }),
			Self::Field(predicate) => {
				let mut map = Map::new();

				map.insert("field".to_string(), Value::String(predicate.field.clone()));
				predicate.op.write_into(&mut map);
				predicate.operand.write_into(&mut map);

				Value::Object(map)
			},
			Self::Path(predicate) => {
				let mut map = Map::new();

				map.insert(
					"path".to_string(),
					serde_json::json!([predicate.origin.as_str(), predicate.key]),
				);
				predicate.op.write_into(&mut map);
				predicate.operand.write_into(&mut map);

				Value::Object(map)
			},
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldPredicate {
	pub field: String,
	pub op: Operator,
	pub operand: Operand,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PathPredicate {
	pub origin: MetadataOrigin,
	pub key: String,
	pub op: Operator,
	pub operand: Operand,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operator {
	Eq,
	Ne,
	In,
	/// Also accepts the `like` spelling.
	Contains,
	Exists,
	NotExists,
	NotContains,
	/// Any other op string. Compiles to a predicate that never matches.
	Unsupported(String),
}
impl Operator {
	pub fn parse(raw: &str) -> Self {
		match raw.to_ascii_lowercase().as_str() {
			"eq" => Self::Eq,
			"ne" => Self::Ne,
			"in" => Self::In,
			"contains" | "like" => Self::Contains,
			"exists" => Self::Exists,
			"not_exists" => Self::NotExists,
			"not_contains" => Self::NotContains,
			_ => Self::Unsupported(raw.to_string()),
		}
	}

	pub fn as_str(&self) -> &str {
		match self {
			Self::Eq => "eq",
			Self::Ne => "ne",
			Self::In => "in",
			Self::Contains => "contains",
			Self::Exists => "exists",
			Self::NotExists => "not_exists",
			Self::NotContains => "not_contains",
			Self::Unsupported(raw) => raw.as_str(),
		}
	}

	fn write_into(&self, map: &mut Map<String, Value>) {
		map.insert("op".to_string(), Value::String(self.as_str().to_string()));
	}
}

#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
	Text(String),
	Number(Number),
	Bool(bool),
	Null,
}
impl Scalar {
	/// Text form used for comparison against extracted metadata. `None` for null.
	pub fn as_text(&self) -> Option<String> {
		match self {
			Self::Text(value) => Some(value.clone()),
			Self::Number(value) => Some(value.to_string()),
			Self::Bool(value) => Some(value.to_string()),
			Self::Null => None,
		}
	}

	fn to_value(&self) -> Value {
		match self {
			Self::Text(value) => Value::String(value.clone()),
			Self::Number(value) => Value::Number(value.clone()),
			Self::Bool(value) => Value::Bool(*value),
			Self::Null => Value::Null,
		}
	}
}

/// The right-hand side of a predicate as written: `value`, `values`, or neither.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Operand {
	pub value: Option<Scalar>,
	pub values: Option<Vec<Scalar>>,
}
impl Operand {
	/// Single comparison value; a missing `value` behaves like null.
	pub fn single(&self) -> &Scalar {
		static NULL: Scalar = Scalar::Null;

		self.value
			.as_ref()
			.or_else(|| self.values.as_ref().and_then(|v| v.first()))
			.unwrap_or(&NULL)
	}

	/// Candidate list for `in`; a lone `value` counts as a one-element list.
	pub fn list(&self) -> Vec<&Scalar> {
		match (self.values.as_ref(), self.value.as_ref()) {
			(Some(values), _) => values.iter().collect(),
			(None, Some(value)) => vec![value],
			(None, None) => Vec::new(),
		}
	}

	fn write_into(&self, map: &mut Map<String, Value>) {
		if let Some(value) = self.value.as_ref() {
			map.insert("value".to_string(), value.to_value());
		}
		if let Some(values) = self.values.as_ref() {
			map.insert(
				"values".to_string(),
				Value::Array(values.iter().map(Scalar::to_value).collect()),
			);
		}
	}
}

#[derive(Default)]
struct FilterParseState {
	nodes: usize,
	max_depth: usize,
}
impl FilterParseState {
	fn visit(&mut self, path: &str, depth: usize) -> Result<(), FilterParseError> {
		self.nodes = self.nodes.saturating_add(1);
		self.max_depth = self.max_depth.max(depth);

		if self.nodes > MAX_FILTER_NODES {
			return Err(FilterParseError::new(
				path,
				format!("filter exceeds node limit ({}/{}).", self.nodes, MAX_FILTER_NODES),
			));
		}
		if self.max_depth > MAX_FILTER_DEPTH {
			return Err(FilterParseError::new(
				path,
				format!("filter exceeds depth limit ({}/{}).", self.max_depth, MAX_FILTER_DEPTH),
			));
		}

		Ok(())
	}
}

fn parse_expr(
	value: &Value,
	path: &str,
	depth: usize,
	state: &mut FilterParseState,
) -> Result<FilterExpr, FilterParseError> {
	state.visit(path, depth)?;

	if let Value::Array(children) = value {
		return parse_children(children, path, depth, state).map(FilterExpr::And);
	}

	let Some(map) = value.as_object() else {
		return Err(FilterParseError::new(path, "filter node must be an object or an array."));
	};

	for group in ["and", "or", "not"] {
		let Some(raw) = map.get(group) else {
			continue;
		};

		if map.len() != 1 {
			return Err(FilterParseError::new(
				path,
				format!("'{group}' node must not carry other keys."),
			));
		}

		let child_path = format!("{path}.{group}");

		return match group {
			"and" => parse_group_args(raw, &child_path, depth, state).map(FilterExpr::And),
			"or" => parse_group_args(raw, &child_path, depth, state).map(FilterExpr::Or),
			_ => parse_not(raw, &child_path, depth, state),
		};
	}

	// A leaf that names both `field` and `path` resolves through the catalog.
	if let Some(field) = map.get("field") {
		let field = parse_string(&format!("{path}.field"), field)?;
		let (op, operand) = parse_op_and_operand(map, path)?;

		return Ok(FilterExpr::Field(FieldPredicate { field, op, operand }));
	}
	if let Some(raw_path) = map.get("path") {
		let (origin, key) = parse_metadata_path(&format!("{path}.path"), raw_path)?;
		let (op, operand) = parse_op_and_operand(map, path)?;

		return Ok(FilterExpr::Path(PathPredicate { origin, key, op, operand }));
	}

	Err(FilterParseError::new(path, "filter node must contain one of and, or, not, field, path."))
}

fn parse_group_args(
	raw: &Value,
	path: &str,
	depth: usize,
	state: &mut FilterParseState,
) -> Result<Vec<FilterExpr>, FilterParseError> {
	let children =
		raw.as_array().ok_or_else(|| FilterParseError::new(path, "group args must be an array."))?;

	parse_children(children, path, depth, state)
}

fn parse_children(
	children: &[Value],
	path: &str,
	depth: usize,
	state: &mut FilterParseState,
) -> Result<Vec<FilterExpr>, FilterParseError> {
	children
		.iter()
		.enumerate()
		.map(|(index, child)| {
			parse_expr(child, &format!("{path}[{index}]"), depth.saturating_add(1), state)
		})
		.collect()
}

fn parse_not(
	raw: &Value,
	path: &str,
	depth: usize,
	state: &mut FilterParseState,
) -> Result<FilterExpr, FilterParseError> {
	let child = match raw {
		Value::Array(children) if children.len() == 1 => &children[0],
		Value::Array(_) => {
			return Err(FilterParseError::new(path, "not takes exactly one child."));
		},
		other => other,
	};
	let child = parse_expr(child, path, depth.saturating_add(1), state)?;

	Ok(FilterExpr::Not(Box::new(child)))
}

fn parse_op_and_operand(
	map: &Map<String, Value>,
	path: &str,
) -> Result<(Operator, Operand), FilterParseError> {
	let op_path = format!("{path}.op");
	let op = map
		.get("op")
		.ok_or_else(|| FilterParseError::new(&op_path, "predicate is missing required op."))?;
	let op = Operator::parse(&parse_string(&op_path, op)?);
	let mut operand = Operand::default();

	if let Some(raw) = map.get("values") {
		operand.values = Some(parse_scalar_list(&format!("{path}.values"), raw)?);
	}
	if let Some(raw) = map.get("value") {
		let value_path = format!("{path}.value");

		match raw {
			// `"value": [..]` is read as `values` when `values` is absent.
			Value::Array(_) if operand.values.is_none() =>
				operand.values = Some(parse_scalar_list(&value_path, raw)?),
			_ => operand.value = Some(parse_scalar(&value_path, raw)?),
		}
	}

	Ok((op, operand))
}

fn parse_metadata_path(
	path: &str,
	raw: &Value,
) -> Result<(MetadataOrigin, String), FilterParseError> {
	let parts = raw.as_array().filter(|parts| parts.len() == 2).ok_or_else(|| {
		FilterParseError::new(path, "path must be a two-element [origin, key] array.")
	})?;
	let origin_path = format!("{path}[0]");
	let origin_raw = parse_string(&origin_path, &parts[0])?;
	let origin = MetadataOrigin::parse(&origin_raw).ok_or_else(|| {
		FilterParseError::new(
			&origin_path,
			format!("unknown metadata origin '{origin_raw}', expected file, source, or llm."),
		)
	})?;
	let key = parse_string(&format!("{path}[1]"), &parts[1])?;

	if key.trim().is_empty() {
		return Err(FilterParseError::new(&format!("{path}[1]"), "path key must be non-empty."));
	}

	Ok((origin, key))
}

fn parse_scalar_list(path: &str, raw: &Value) -> Result<Vec<Scalar>, FilterParseError> {
	let items =
		raw.as_array().ok_or_else(|| FilterParseError::new(path, "values must be an array."))?;

	if items.len() > MAX_IN_LIST_ITEMS {
		return Err(FilterParseError::new(
			path,
			format!("values list exceeds maximum size ({}/{}).", items.len(), MAX_IN_LIST_ITEMS),
		));
	}

	items
		.iter()
		.enumerate()
		.map(|(index, item)| parse_scalar(&format!("{path}[{index}]"), item))
		.collect()
}

fn parse_scalar(path: &str, raw: &Value) -> Result<Scalar, FilterParseError> {
	match raw {
		Value::String(_) => parse_string(path, raw).map(Scalar::Text),
		Value::Number(number) => Ok(Scalar::Number(number.clone())),
		Value::Bool(flag) => Ok(Scalar::Bool(*flag)),
		Value::Null => Ok(Scalar::Null),
		Value::Array(_) | Value::Object(_) =>
			Err(FilterParseError::new(path, "scalar value expected.")),
	}
}

fn parse_string(path: &str, raw: &Value) -> Result<String, FilterParseError> {
	let value = raw.as_str().ok_or_else(|| FilterParseError::new(path, "string value expected."))?;

	if value.len() > MAX_STRING_BYTES {
		return Err(FilterParseError::new(
			path,
			format!("string value exceeds maximum bytes ({MAX_STRING_BYTES})."),
		));
	}

	Ok(value.to_string())
}
