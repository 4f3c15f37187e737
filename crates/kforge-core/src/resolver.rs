//! Dependency/version-constrained activation order resolver.
//!
//! Builds a dependency graph from a set of plugin descriptors, validates
//! version constraints along each edge, detects cycles, and produces a
//! deterministic topological order via a Kahn's-algorithm frontier with a
//! three-tier tie-break: higher `priority` first, then higher caller-supplied
//! `user_order` rank, then lexicographically smaller name.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::plugin::PluginDescriptor;

/// A plugin ready to be scheduled, ordered for use in a max-heap so that
/// `BinaryHeap::pop` always yields the plugin that should activate next.
#[derive(Eq, PartialEq)]
struct Ready {
    name: String,
    priority: i64,
    user_order: i64,
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.user_order.cmp(&other.user_order))
            .then_with(|| other.name.cmp(&self.name))
    }
}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Computes the activation order for `descriptors`.
///
/// `user_order` assigns an optional integer rank per plugin name; entries
/// absent from the map are treated as the lowest possible rank. Returns the
/// plugin names in activation order, or an error identifying the first
/// constraint violation or cycle encountered.
pub fn resolve_order(
    descriptors: &[PluginDescriptor],
    user_order: &HashMap<String, i64>,
) -> Result<Vec<String>> {
    let by_name: HashMap<&str, &PluginDescriptor> =
        descriptors.iter().map(|d| (d.name.as_str(), d)).collect();

    // adjacency[dep] = set of dependents that must come after dep.
    let mut adjacency: HashMap<&str, Vec<&str>> =
        descriptors.iter().map(|d| (d.name.as_str(), Vec::new())).collect();
    let mut in_degree: HashMap<&str, u32> =
        descriptors.iter().map(|d| (d.name.as_str(), 0)).collect();

    for d in descriptors {
        for dep in &d.depends_on {
            match by_name.get(dep.name.as_str()) {
                Some(dep_descriptor) => {
                    if let Some(constraint) = &dep.constraint {
                        if !constraint.matches(&dep_descriptor.version) {
                            return Err(Error::VersionConflict {
                                consumer: d.name.clone(),
                                dependency: dep.name.clone(),
                                constraint: constraint.clone(),
                                actual: dep_descriptor.version.clone(),
                            });
                        }
                    }
                    adjacency.get_mut(dep.name.as_str()).unwrap().push(d.name.as_str());
                    *in_degree.get_mut(d.name.as_str()).unwrap() += 1;
                }
                None => {
                    if dep.optional {
                        continue;
                    }
                    return Err(Error::MissingDependency {
                        consumer: d.name.clone(),
                        dependency: dep.name.clone(),
                    });
                }
            }
        }
    }

    let mut heap: BinaryHeap<Ready> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(name, _)| Ready {
            name: name.to_string(),
            priority: by_name[name].priority,
            user_order: *user_order.get(*name).unwrap_or(&i64::MIN),
        })
        .collect();

    let mut remaining_in_degree = in_degree.clone();
    let mut order = Vec::with_capacity(descriptors.len());

    while let Some(ready) = heap.pop() {
        let name = ready.name;
        order.push(name.clone());
        for &dependent in &adjacency[name.as_str()] {
            let deg = remaining_in_degree.get_mut(dependent).unwrap();
            *deg -= 1;
            if *deg == 0 {
                heap.push(Ready {
                    name: dependent.to_string(),
                    priority: by_name[dependent].priority,
                    user_order: *user_order.get(dependent).unwrap_or(&i64::MIN),
                });
            }
        }
    }

    if order.len() != descriptors.len() {
        let unresolved: HashSet<&str> = by_name
            .keys()
            .copied()
            .filter(|name| !order.iter().any(|o| o == name))
            .collect();
        let cycle = find_cycle_path(&adjacency, &unresolved);
        return Err(Error::CircularDependency(cycle));
    }

    Ok(order)
}

/// Finds one concrete cycle among `candidates` by DFS, returning the cycle
/// as a sequence of names in traversal order (the repeated node is not
/// duplicated at the end). Only called once Kahn's algorithm has already
/// established that a cycle exists among these nodes.
fn find_cycle_path(adjacency: &HashMap<&str, Vec<&str>>, candidates: &HashSet<&str>) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        candidates: &HashSet<&'a str>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        stack.push(node);
        marks.insert(node, Mark::Visiting);
        for &next in adjacency.get(node).into_iter().flatten() {
            if !candidates.contains(next) {
                continue;
            }
            match marks.get(next) {
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|n| *n == next).unwrap();
                    return Some(stack[start..].iter().map(|s| s.to_string()).collect());
                }
                Some(Mark::Done) => continue,
                None => {
                    if let Some(found) = visit(next, adjacency, candidates, marks, stack) {
                        return Some(found);
                    }
                }
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut sorted_candidates: Vec<&str> = candidates.iter().copied().collect();
    sorted_candidates.sort_unstable();
    for &start in &sorted_candidates {
        if marks.contains_key(start) {
            continue;
        }
        if let Some(cycle) = visit(start, adjacency, candidates, &mut marks, &mut stack) {
            return cycle;
        }
    }
    // Unreachable in practice: resolve_order only calls this when Kahn's
    // algorithm left a nonempty unresolved set, which always contains a cycle.
    sorted_candidates.into_iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{DependencySpec, PluginApi};
    use crate::version::{parse_version, VersionConstraint};

    fn plugin(name: &str, priority: i64) -> PluginDescriptor {
        PluginDescriptor::builder(name, parse_version("1.0.0").unwrap())
            .priority(priority)
            .setup(|_ctx, _opts| async { Ok(PluginApi::new(())) })
            .build()
            .unwrap()
    }

    fn with_dep(descriptor: PluginDescriptor, dep: DependencySpec) -> PluginDescriptor {
        let mut builder = PluginDescriptor::builder(descriptor.name.clone(), descriptor.version.clone())
            .priority(descriptor.priority)
            .depends_on(dep)
            .setup(|_ctx, _opts| async { Ok(PluginApi::new(())) });
        for d in &descriptor.depends_on {
            builder = builder.depends_on(d.clone());
        }
        builder.build().unwrap()
    }

    #[test]
    fn order_under_priority() {
        let a = plugin("A", 0);
        let b = with_dep(plugin("B", 0), DependencySpec::optional("A", None));
        let c = plugin("C", 10);
        let order = resolve_order(&[a, b, c], &HashMap::new()).unwrap();
        assert_eq!(order, vec!["C", "A", "B"]);
    }

    #[test]
    fn missing_required_dependency_fails() {
        let a = with_dep(plugin("A", 0), DependencySpec::required("B", VersionConstraint::parse("^1.0.0").unwrap()));
        let err = resolve_order(&[a], &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::MissingDependency { dependency, .. } if dependency == "B"));
    }

    #[test]
    fn missing_optional_dependency_is_dropped() {
        let a = with_dep(plugin("A", 0), DependencySpec::optional("B", None));
        let order = resolve_order(&[a], &HashMap::new()).unwrap();
        assert_eq!(order, vec!["A"]);
    }

    #[test]
    fn version_mismatch_fails() {
        let a = plugin("A", 0);
        let mut a = a;
        a.version = parse_version("1.0.0").unwrap();
        let b = with_dep(
            plugin("B", 0),
            DependencySpec::required("A", VersionConstraint::parse("^2.0.0").unwrap()),
        );
        let err = resolve_order(&[a, b], &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::VersionConflict { .. }));
    }

    #[test]
    fn cycle_is_reported_in_traversal_order() {
        let a = with_dep(plugin("A", 0), DependencySpec::required("C", VersionConstraint::parse("*").unwrap()));
        let b = with_dep(plugin("B", 0), DependencySpec::required("A", VersionConstraint::parse("*").unwrap()));
        let c = with_dep(plugin("C", 0), DependencySpec::required("B", VersionConstraint::parse("*").unwrap()));
        let err = resolve_order(&[a, b, c], &HashMap::new()).unwrap_err();
        match err {
            Error::CircularDependency(cycle) => assert_eq!(cycle.len(), 3),
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn output_is_deterministic_across_repeated_runs() {
        let descriptors = vec![plugin("Z", 5), plugin("A", 5), plugin("M", 5)];
        let first = resolve_order(&descriptors, &HashMap::new()).unwrap();
        let second = resolve_order(&descriptors, &HashMap::new()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec!["A", "M", "Z"]);
    }

    #[test]
    fn user_order_breaks_ties_between_priority_and_name() {
        let descriptors = vec![plugin("A", 0), plugin("B", 0)];
        let mut user_order = HashMap::new();
        user_order.insert("B".to_string(), 1);
        let order = resolve_order(&descriptors, &user_order).unwrap();
        assert_eq!(order, vec!["B", "A"]);
    }
}
