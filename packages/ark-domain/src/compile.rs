//! Filter expression to parameterized SQL.
//!
//! The emitted fragment is a boolean expression over the document table aliased as `d` with the
//! columns `source_id`, `file_metadata`, `source_metadata`, and `llm_metadata` (all metadata
//! columns are `jsonb`). Every literal, metadata key, and source id is bound through a named
//! placeholder (`:p0`, `:p1`, ...); the fragment text never contains caller-supplied data.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::filter::{FieldPredicate, FilterExpr, Operand, Operator, PathPredicate};
use ark_config::{ChainStep, FieldDefinition, MetadataOrigin};

const SOURCE_ID_COLUMN: &str = "d.source_id";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompiledPredicate {
	pub sql: String,
	/// Placeholder name (without the leading colon) to bound text value.
	pub params: BTreeMap<String, String>,
}
impl CompiledPredicate {
	/// An empty fragment means "no restriction".
	pub fn is_empty(&self) -> bool {
		self.sql.trim().is_empty()
	}
}

pub fn compile(expr: &FilterExpr, fields: &[FieldDefinition]) -> CompiledPredicate {
	let mut compiler = Compiler { fields, params: ParamBuilder::default() };
	let sql = compiler.expr(expr);

	CompiledPredicate { sql, params: compiler.params.into_inner() }
}

/// Parses and compiles in one step. Input that is not a valid tree compiles to an empty fragment.
pub fn compile_value(raw: &Value, fields: &[FieldDefinition]) -> CompiledPredicate {
	match FilterExpr::parse(raw) {
		Ok(expr) => compile(&expr, fields),
		Err(_) => CompiledPredicate::default(),
	}
}

#[derive(Default)]
struct ParamBuilder {
	params: BTreeMap<String, String>,
}
impl ParamBuilder {
	fn bind(&mut self, value: impl Into<String>) -> String {
		let name = format!("p{}", self.params.len());
		let placeholder = format!(":{name}");

		self.params.insert(name, value.into());

		placeholder
	}

	fn into_inner(self) -> BTreeMap<String, String> {
		self.params
	}
}

struct Compiler<'a> {
	fields: &'a [FieldDefinition],
	params: ParamBuilder,
}
impl Compiler<'_> {
	fn expr(&mut self, expr: &FilterExpr) -> String {
		match expr {
			FilterExpr::And(children) => self.group(children, "AND", "TRUE"),
			FilterExpr::Or(children) => self.group(children, "OR", "FALSE"),
			FilterExpr::Not(child) => {
				let inner = self.expr(child);

				if inner.is_empty() { String::new() } else { format!("(NOT {inner})") }
			},
			FilterExpr::Field(predicate) => self.field(predicate),
			FilterExpr::Path(predicate) => self.path(predicate),
		}
	}

	fn group(&mut self, children: &[FilterExpr], joiner: &str, empty: &str) -> String {
		let parts = children
			.iter()
			.map(|child| self.expr(child))
			.filter(|part| !part.is_empty())
			.collect::<Vec<_>>();

		match parts.len() {
			0 => empty.to_string(),
			1 => parts.into_iter().next().unwrap_or_default(),
			_ => format!("({})", parts.join(&format!(" {joiner} "))),
		}
	}

	fn path(&mut self, predicate: &PathPredicate) -> String {
		let column = metadata_column(predicate.origin);
		let key = self.params.bind(predicate.key.as_str());
		let operand = format!("NULLIF(btrim({column} ->> {key}), '')");

		self.scalar_op(&operand, &predicate.op, &predicate.operand)
	}

	fn field(&mut self, predicate: &FieldPredicate) -> String {
		let Some(definition) = self.fields.iter().find(|field| field.name == predicate.field) else {
			return "FALSE".to_string();
		};
		let mut clauses = Vec::with_capacity(definition.sources.len() + 1);
		let mut mapped = Vec::with_capacity(definition.sources.len());

		for source in &definition.sources {
			let source_id = self.params.bind(source.source_id.as_str());
			let values = self.chain(&source.chain);
			let condition = self.array_op(&values, &predicate.op, &predicate.operand);

			// `IS NOT DISTINCT FROM` keeps the guard two-valued for documents without a source.
			clauses.push(format!(
				"({SOURCE_ID_COLUMN} IS NOT DISTINCT FROM {source_id} AND {condition})"
			));
			mapped.push(source_id);
		}

		let values = self.chain(&definition.fallback_chain());
		let condition = self.array_op(&values, &predicate.op, &predicate.operand);

		if mapped.is_empty() {
			clauses.push(condition);
		} else {
			clauses.push(format!(
				"(({SOURCE_ID_COLUMN} IS NULL OR {SOURCE_ID_COLUMN} NOT IN ({})) AND {condition})",
				mapped.join(", ")
			));
		}

		if clauses.len() == 1 {
			clauses.into_iter().next().unwrap_or_default()
		} else {
			format!("({})", clauses.join(" OR "))
		}
	}

	/// `text[]` expression for a resolution chain: the first step that yields a value wins.
	fn chain(&mut self, steps: &[ChainStep]) -> String {
		let parts = steps.iter().map(|step| self.step(step)).collect::<Vec<_>>();

		match parts.len() {
			0 => "NULL::text[]".to_string(),
			1 => parts.into_iter().next().unwrap_or_default(),
			_ => format!("COALESCE({})", parts.join(", ")),
		}
	}

	fn step(&mut self, step: &ChainStep) -> String {
		match step {
			ChainStep::Constant { value, values } => {
				let texts = match (values.as_ref(), value.as_ref()) {
					(Some(values), _) =>
						values.iter().filter_map(constant_text).collect::<Vec<_>>(),
					(None, Some(value)) => constant_text(value).into_iter().collect(),
					(None, None) => Vec::new(),
				};

				if texts.is_empty() {
					return "NULL::text[]".to_string();
				}

				let placeholders =
					texts.into_iter().map(|text| self.params.bind(text)).collect::<Vec<_>>();

				format!("ARRAY[{}]::text[]", placeholders.join(", "))
			},
			_ => {
				let Some((origin, key)) = step.metadata() else {
					return "NULL::text[]".to_string();
				};
				let column = metadata_column(origin);
				let key = self.params.bind(key);

				// Arrays become their non-blank elements, scalars a one-element array. Empty
				// results collapse to NULL so the next step in the chain is consulted.
				format!(
					"(CASE jsonb_typeof({column} -> {key}) \
WHEN 'array' THEN (\
SELECT array_agg(btrim(el)) \
FROM jsonb_array_elements_text({column} -> {key}) AS el \
WHERE NULLIF(btrim(el), '') IS NOT NULL) \
ELSE (CASE WHEN NULLIF(btrim({column} ->> {key}), '') IS NULL THEN NULL::text[] \
ELSE ARRAY[btrim({column} ->> {key})] END) \
END)"
				)
			},
		}
	}

	/// Scalar leaves are two-valued: a comparison against a missing key is `FALSE`, never `NULL`,
	/// so `NOT` inverts them exactly.
	fn scalar_op(&mut self, operand: &str, op: &Operator, rhs: &Operand) -> String {
		match op {
			Operator::Eq => match rhs.single().as_text() {
				Some(text) => format!("COALESCE({operand} = {}, FALSE)", self.params.bind(text)),
				None => format!("({operand} IS NULL)"),
			},
			Operator::Ne => match rhs.single().as_text() {
				Some(text) => format!("({operand} IS DISTINCT FROM {})", self.params.bind(text)),
				None => format!("({operand} IS NOT NULL)"),
			},
			Operator::In => {
				let (texts, has_null) = split_list(rhs);
				let mut branches = texts
					.into_iter()
					.map(|text| format!("{operand} = {}", self.params.bind(text)))
					.collect::<Vec<_>>();

				if has_null {
					branches.push(format!("{operand} IS NULL"));
				}
				if branches.is_empty() {
					return "FALSE".to_string();
				}

				format!("COALESCE({}, FALSE)", branches.join(" OR "))
			},
			Operator::Contains => match rhs.single().as_text() {
				Some(text) =>
					format!("COALESCE({}, FALSE)", contains_sql(operand, &self.params.bind(text))),
				None => "FALSE".to_string(),
			},
			Operator::NotContains => match rhs.single().as_text() {
				Some(text) => format!(
					"({operand} IS NULL OR NOT {})",
					contains_sql(operand, &self.params.bind(text))
				),
				None => "FALSE".to_string(),
			},
			Operator::Exists => format!("({operand} IS NOT NULL)"),
			Operator::NotExists => format!("({operand} IS NULL)"),
			Operator::Unsupported(_) => "FALSE".to_string(),
		}
	}

	fn array_op(&mut self, values: &str, op: &Operator, rhs: &Operand) -> String {
		match op {
			Operator::Eq => match rhs.single().as_text() {
				Some(text) => any_element(values, &format!("el = {}", self.params.bind(text))),
				None => format!("({values} IS NULL)"),
			},
			Operator::Ne => match rhs.single().as_text() {
				Some(text) => {
					let condition = format!("el = {}", self.params.bind(text));

					format!("(NOT {})", any_element(values, &condition))
				},
				None => format!("({values} IS NOT NULL)"),
			},
			Operator::In => {
				let (texts, has_null) = split_list(rhs);
				let mut branches = Vec::with_capacity(2);

				if !texts.is_empty() {
					let equalities = texts
						.into_iter()
						.map(|text| format!("el = {}", self.params.bind(text)))
						.collect::<Vec<_>>();

					branches.push(any_element(values, &equalities.join(" OR ")));
				}
				if has_null {
					branches.push(format!("{values} IS NULL"));
				}
				if branches.is_empty() {
					return "FALSE".to_string();
				}

				format!("({})", branches.join(" OR "))
			},
			Operator::Contains => match rhs.single().as_text() {
				Some(text) => any_element(values, &contains_sql("el", &self.params.bind(text))),
				None => "FALSE".to_string(),
			},
			Operator::NotContains => match rhs.single().as_text() {
				Some(text) => format!(
					"(NOT {})",
					any_element(values, &contains_sql("el", &self.params.bind(text)))
				),
				None => "FALSE".to_string(),
			},
			Operator::Exists => format!("({values} IS NOT NULL)"),
			Operator::NotExists => format!("({values} IS NULL)"),
			Operator::Unsupported(_) => "FALSE".to_string(),
		}
	}
}

fn metadata_column(origin: MetadataOrigin) -> &'static str {
	match origin {
		MetadataOrigin::File => "d.file_metadata",
		MetadataOrigin::Source => "d.source_metadata",
		MetadataOrigin::Llm => "d.llm_metadata",
	}
}

fn any_element(values: &str, condition: &str) -> String {
	format!("EXISTS (SELECT 1 FROM unnest({values}) AS el WHERE {condition})")
}

// `strpos` keeps `%` and `_` in the needle literal.
fn contains_sql(haystack: &str, needle: &str) -> String {
	format!("strpos(lower({haystack}), lower({needle})) > 0")
}

fn split_list(rhs: &Operand) -> (Vec<String>, bool) {
	let mut texts = Vec::new();
	let mut has_null = false;

	for scalar in rhs.list() {
		match scalar.as_text() {
			Some(text) => texts.push(text),
			None => has_null = true,
		}
	}

	(texts, has_null)
}

fn constant_text(value: &Value) -> Option<String> {
	match value {
		Value::String(text) => Some(text.clone()),
		Value::Number(number) => Some(number.to_string()),
		Value::Bool(flag) => Some(flag.to_string()),
		Value::Null | Value::Array(_) | Value::Object(_) => None,
	}
}
