//! Rewrites named placeholders (`:p0`) to Postgres positional ones (`$n`).

use std::collections::{BTreeMap, HashMap};

use crate::{Error, Result};

/// A fragment ready to append to a query whose own parameters occupy `$1..=$offset`.
#[derive(Debug, PartialEq, Eq)]
pub struct PositionalSql {
	pub sql: String,
	/// Values for `$offset+1`, `$offset+2`, ... in order.
	pub values: Vec<String>,
}

/// Every `:name` outside string literals becomes `$n`, numbered from `offset + 1` in order of
/// first appearance. Repeated names share one position. `::type` casts are left alone, and a name
/// missing from `params` is an error.
pub fn bind_named(
	sql: &str,
	params: &BTreeMap<String, String>,
	offset: usize,
) -> Result<PositionalSql> {
	let mut out = String::with_capacity(sql.len());
	let mut values = Vec::new();
	let mut positions: HashMap<&str, usize> = HashMap::new();
	let mut in_literal = false;
	let mut chars = sql.char_indices().peekable();

	while let Some((index, ch)) = chars.next() {
		if ch == '\'' {
			in_literal = !in_literal;

			out.push(ch);

			continue;
		}
		if in_literal || ch != ':' {
			out.push(ch);

			continue;
		}

		match chars.peek() {
			Some((_, ':')) => {
				out.push_str("::");
				chars.next();
			},
			Some((_, next)) if next.is_ascii_alphabetic() || *next == '_' => {
				let start = index + 1;
				let mut end = start;

				while let Some((i, c)) = chars.peek() {
					if c.is_ascii_alphanumeric() || *c == '_' {
						end = i + c.len_utf8();

						chars.next();
					} else {
						break;
					}
				}

				let name = &sql[start..end];
				let position = match positions.get(name) {
					Some(position) => *position,
					None => {
						let value = params.get(name).ok_or_else(|| {
							Error::InvalidArgument(format!("Unbound SQL parameter :{name}."))
						})?;

						values.push(value.clone());

						let position = offset + values.len();

						positions.insert(name, position);

						position
					},
				};

				out.push('$');
				out.push_str(&position.to_string());
			},
			_ => out.push(ch),
		}
	}

	Ok(PositionalSql { sql: out, values })
}
