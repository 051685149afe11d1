use std::{cmp::Ordering, collections::HashSet};

use crate::state::Source;

/// Best-scored first, one entry per chunk id, at most `max_sources` entries.
pub fn assemble_sources(chunks: &[Source], max_sources: usize) -> Vec<Source> {
	let mut sorted = chunks.to_vec();

	sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

	let mut seen = HashSet::new();

	sorted.retain(|chunk| seen.insert(chunk.id));
	sorted.truncate(max_sources);

	sorted
}
