//! Read-method selection.
//!
//! A remote API often offers several ways to address the same entity: by
//! organization, by network, by network and serial. Each way needs a
//! different set of parameters. Given which parameters the caller actually
//! has, the selector picks the most specific method.

use crate::value::{Record, Value};

/// The fraction of parameters present. An empty vector has specificity 0.
pub fn specificity(params: &[bool]) -> f64 {
    if params.is_empty() {
        return 0.0;
    }
    let present = params.iter().filter(|p| **p).count();
    present as f64 / params.len() as f64
}

/// Pick the method with the greatest specificity.
///
/// Returns a 1-based index. Ties keep the earliest method, and when no
/// method has any parameter present the first (most general) one is chosen.
/// Returns `None` for an empty list.
///
/// ```
/// use hemmer_reconcile::selector::pick_method;
///
/// assert_eq!(pick_method(&[vec![true, false], vec![true]]), Some(2));
/// assert_eq!(pick_method(&[vec![true], vec![true, true]]), Some(1));
/// ```
pub fn pick_method(methods: &[Vec<bool>]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, params) in methods.iter().enumerate() {
        let score = specificity(params);
        match best {
            Some((_, top)) if score <= top => {},
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i + 1)
}

/// A labelled read method and the presence of each of its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<T> {
    /// Caller-defined label, e.g. an enum naming the remote endpoint.
    pub label: T,
    /// Whether each parameter of the method is available.
    pub params: Vec<bool>,
}

impl<T> Candidate<T> {
    /// Create a candidate from a presence vector.
    pub fn new(label: T, params: Vec<bool>) -> Self {
        Self { label, params }
    }

    /// Create a candidate by checking which of `params` are set in `record`.
    ///
    /// A parameter is set when it is known and neither `Null`, an empty
    /// string nor an empty list.
    pub fn from_record(label: T, record: &Record, params: &[&str]) -> Self {
        Self {
            label,
            params: params.iter().map(|name| is_set(record.get(name))).collect(),
        }
    }

    /// The specificity of this candidate.
    pub fn specificity(&self) -> f64 {
        specificity(&self.params)
    }
}

fn is_set(value: &Value) -> bool {
    match value {
        Value::Unknown | Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::List(items) => !items.is_empty(),
        _ => true,
    }
}

/// Pick the most specific candidate, with the same rules as [`pick_method`].
pub fn pick_candidate<T>(candidates: &[Candidate<T>]) -> Option<&Candidate<T>> {
    let methods: Vec<Vec<bool>> = candidates.iter().map(|c| c.params.clone()).collect();
    pick_method(&methods).map(|index| &candidates[index - 1])
}
