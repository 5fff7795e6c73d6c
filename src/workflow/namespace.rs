//! Namespace Utilities
//!
//! Pure helpers for naming step instances and for reasoning about
//! namespace paths (the root-to-step sequence of synthetic step names).
//!
//! Composite identifiers are joined with a triple underscore so that user
//! names containing single or double underscores never collide with the
//! generated ones.

use indexmap::IndexMap;

/// Separator for (namespace, parameter) and (namespace, step) identifiers.
pub const NS_SEP: &str = "___";

/// Infix used by [`step_name`].
const STEP_INFIX: &str = "__step__";

/// Produces the unique synthetic name of a step instance.
///
/// `index` is the 0-based position of the step; the generated name uses
/// 1-based numbering to match the override keys users write.
///
/// # Example
///
/// ```
/// use rustweaver::workflow::namespace::step_name;
///
/// assert_eq!(step_name("align", 0, "bowtie2"), "align__step__1__bowtie2");
/// ```
pub fn step_name(workflow_stem: &str, index: usize, step_key: &str) -> String {
    format!("{}{}{}__{}", workflow_stem, STEP_INFIX, index + 1, step_key)
}

/// Splits a synthetic step name back into `(stem, index, key)`.
///
/// Names that were not produced by [`step_name`] (plain step keys) are
/// returned as a stem with no index.
pub fn parse_step_name(name: &str) -> (String, Option<usize>, String) {
    let Some((stem, rest)) = name.split_once(STEP_INFIX) else {
        return (name.to_string(), None, String::new());
    };

    match rest.split_once("__") {
        Some((num, key)) => match num.parse::<usize>() {
            Ok(n) if n > 0 => (stem.to_string(), Some(n - 1), key.to_string()),
            _ => (name.to_string(), None, String::new()),
        },
        None => (name.to_string(), None, String::new()),
    }
}

/// Result of [`partition_by_lowest_common_ancestor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LcaPartition {
    /// Shared prefix of both paths
    pub common: Vec<String>,
    /// Remainder of the first path after the point of divergence
    pub left_tail: Vec<String>,
    /// Remainder of the second path after the point of divergence
    pub right_tail: Vec<String>,
}

/// Splits two namespace paths at their first point of divergence.
///
/// The length of `common` tells how many levels an edge between the two
/// paths must cross, and indexes the graph of the lowest common ancestor
/// in the ancestor graph stack.
pub fn partition_by_lowest_common_ancestor(a: &[String], b: &[String]) -> LcaPartition {
    let shared = a
        .iter()
        .zip(b.iter())
        .take_while(|(x, y)| x == y)
        .count();

    LcaPartition {
        common: a[..shared].to_vec(),
        left_tail: a[shared..].to_vec(),
        right_tail: b[shared..].to_vec(),
    }
}

/// Joins namespace segments with [`NS_SEP`].
pub fn join_namespaces<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(NS_SEP)
}

/// Returns `"{prefix}___{name}"`.
pub fn namespaced(prefix: &str, name: &str) -> String {
    format!("{}{}{}", prefix, NS_SEP, name)
}

/// Returns every `___`-separated segment of `name` except the last.
///
/// Namespaced parameter names carry the path of the step that owns them;
/// this recovers that embedded path.
pub fn split_embedded(name: &str) -> Vec<String> {
    let mut parts: Vec<String> = name.split(NS_SEP).map(str::to_string).collect();
    parts.pop();
    parts
}

/// Returns the last `___`-separated segment of `name`.
pub fn last_segment(name: &str) -> &str {
    name.rsplit(NS_SEP).next().unwrap_or(name)
}

/// Strips a trailing file extension from a step key (`sub.wic` → `sub`).
pub fn key_stem(step_key: &str) -> &str {
    match step_key.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => step_key,
    }
}

/// Builds the per-step override key `"(i, key)"` (1-based).
pub fn override_key(index: usize, step_key: &str) -> String {
    format!("({}, {})", index + 1, step_key)
}

/// Parses an override key `"(i, key)"` into its 1-based index and key.
pub fn parse_override_key(key: &str) -> Option<(usize, String)> {
    let inner = key.trim().strip_prefix('(')?.strip_suffix(')')?;
    let (num, name) = inner.split_once(',')?;
    let num = num.trim().parse::<usize>().ok()?;
    Some((num, name.trim().to_string()))
}

/// Shifts every override whose 1-based index is `>= from` down by one slot.
///
/// Used after inserting a step so that existing overrides keep pointing at
/// the same steps.
pub fn reindex_overrides<V: Clone>(overrides: &IndexMap<String, V>, from: usize) -> IndexMap<String, V> {
    overrides
        .iter()
        .map(|(key, val)| match parse_override_key(key) {
            Some((num, name)) if num >= from => (format!("({}, {})", num + 1, name), val.clone()),
            _ => (key.clone(), val.clone()),
        })
        .collect()
}
