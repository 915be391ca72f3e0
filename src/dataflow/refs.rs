//! Reference scoping: every `${base...}` must name something available

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use super::DataFlowError;
use crate::ir::WorkflowIr;
use crate::template::{extract_refs, TemplateRef};

/// Names a reference may legally start with, outside any step
struct Scope<'a> {
    inputs: HashSet<&'a str>,
    external: HashSet<&'a str>,
    node_ids: HashSet<&'a str>,
    /// Position of each node in execution order, when the graph is acyclic
    positions: Option<HashMap<&'a str, usize>>,
    aliases: Vec<&'a str>,
}

impl<'a> Scope<'a> {
    fn candidates(&self) -> Vec<&'a str> {
        let mut names: Vec<&str> = self
            .inputs
            .iter()
            .chain(self.external.iter())
            .chain(self.node_ids.iter())
            .copied()
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

pub(super) fn check_references(
    ir: &WorkflowIr,
    order: Option<&[&str]>,
    external: &[String],
) -> Vec<DataFlowError> {
    let scope = Scope {
        inputs: ir.inputs.keys().map(String::as_str).collect(),
        external: external.iter().map(String::as_str).collect(),
        node_ids: ir.node_ids().collect(),
        positions: order.map(|o| o.iter().enumerate().map(|(i, id)| (*id, i)).collect()),
        aliases: ir
            .nodes
            .iter()
            .filter_map(|n| n.batch.as_ref().map(|b| b.alias.as_str()))
            .collect(),
    };
    let mut errors = Vec::new();

    for node in &ir.nodes {
        let alias = node.batch.as_ref().map(|b| b.alias.as_str());

        for reference in extract_refs(&Value::Object(node.params.clone())) {
            if let Some(err) = check_one(&scope, &node.id, &reference, alias) {
                errors.push(err);
            }
        }

        if let Some(batch) = &node.batch {
            // The alias is not yet bound while items are being resolved
            for reference in extract_refs(&Value::String(batch.items.clone())) {
                if let Some(err) = check_one(&scope, &node.id, &reference, None) {
                    errors.push(err);
                }
            }
        }
    }

    for (name, output) in &ir.outputs {
        let Some(source) = &output.source else {
            continue;
        };
        let location = format!("outputs.{}", name);
        for reference in extract_refs(&Value::String(source.clone())) {
            let base = reference.base.as_str();
            if scope.inputs.contains(base)
                || scope.external.contains(base)
                || scope.node_ids.contains(base)
            {
                continue;
            }
            errors.push(undefined(&scope, &location, &reference));
        }
    }

    errors
}

fn check_one(
    scope: &Scope<'_>,
    node_id: &str,
    reference: &TemplateRef,
    alias: Option<&str>,
) -> Option<DataFlowError> {
    let base = reference.base.as_str();

    if alias == Some(base) || scope.inputs.contains(base) || scope.external.contains(base) {
        return None;
    }

    if scope.node_ids.contains(base) {
        let positions = scope.positions.as_ref()?;
        let earlier = match (positions.get(base), positions.get(node_id)) {
            (Some(target), Some(current)) => target < current,
            _ => true,
        };
        return (!earlier).then(|| DataFlowError::ForwardReference {
            node_id: node_id.to_string(),
            template: reference.placeholder(),
            target: base.to_string(),
        });
    }

    Some(undefined(scope, node_id, reference))
}

fn undefined(scope: &Scope<'_>, node_id: &str, reference: &TemplateRef) -> DataFlowError {
    let mut suggestions: Vec<String> = find_similar(&reference.base, &scope.candidates(), 3)
        .into_iter()
        .map(String::from)
        .collect();
    let alias_owner = scope.aliases.contains(&reference.base.as_str());

    if alias_owner && suggestions.is_empty() {
        suggestions.push(format!(
            "'{}' is a batch alias and only exists inside its own batch step",
            reference.base
        ));
    }

    DataFlowError::UndefinedReference {
        node_id: node_id.to_string(),
        template: reference.placeholder(),
        name: reference.base.clone(),
        suggestions,
    }
}

/// Case-insensitive "did you mean": exact match ignoring case first, then
/// containment either way, then small edit distance.
pub fn find_similar<'c>(name: &str, candidates: &[&'c str], max_results: usize) -> Vec<&'c str> {
    let lower = name.to_lowercase();
    let mut ranked: Vec<(usize, &str)> = candidates
        .iter()
        .filter_map(|candidate| {
            let other = candidate.to_lowercase();
            let rank = if other == lower {
                0
            } else if contains_either(&other, &lower) {
                1
            } else if lower.len() > 3 && edit_distance(&other, &lower) <= 2 {
                2
            } else {
                return None;
            };
            Some((rank, *candidate))
        })
        .collect();
    ranked.sort();
    ranked.into_iter().take(max_results).map(|(_, c)| c).collect()
}

fn contains_either(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    short.len() >= 3 && long.contains(short)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        previous = current;
    }

    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similar_names_rank_case_first() {
        let candidates = ["UserName", "user_name_full", "other"];
        assert_eq!(
            find_similar("username", &candidates, 3),
            vec!["UserName"]
        );
        assert_eq!(
            find_similar("user_name", &candidates, 3),
            vec!["user_name_full", "UserName"]
        );
        assert!(find_similar("a", &["abc"], 3).is_empty());
    }

    #[test]
    fn similar_names_tolerate_typos() {
        assert_eq!(find_similar("fetchh", &["fetch", "store"], 3), vec!["fetch"]);
        assert!(find_similar("zzz", &["fetch", "store"], 3).is_empty());
    }

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("same", "same"), 0);
    }
}
