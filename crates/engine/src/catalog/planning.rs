//! Step ordering and dependency planning.

use std::collections::{BTreeSet, HashMap, HashSet};

use indexmap::IndexMap;

use super::StepDefinition;
use crate::error::CatalogError;

/// Order the steps accepted by `include` so every step follows its dependencies.
///
/// Returns indices into `steps`. When several steps are ready at once, the one
/// declared first wins, so the same selection always yields the same order.
/// Dependencies on steps that exist in the catalog but are not included are
/// not ordering edges. Errors on duplicate keys, unknown dependencies,
/// self-dependencies, and cycles among the included steps.
pub fn order_steps(steps: &[StepDefinition], include: impl Fn(&StepDefinition) -> bool) -> Result<Vec<usize>, CatalogError> {
    let mut catalog_keys: HashSet<&str> = HashSet::with_capacity(steps.len());
    for step in steps {
        if !catalog_keys.insert(step.key.as_str()) {
            return Err(CatalogError::DuplicateStep(step.key.clone()));
        }
    }

    let lookup: IndexMap<&str, usize> = steps
        .iter()
        .enumerate()
        .filter(|(_, step)| include(step))
        .map(|(index, step)| (step.key.as_str(), index))
        .collect();

    let mut in_degrees: HashMap<usize, usize> = lookup.values().map(|index| (*index, 0)).collect();
    let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();

    for (step_key, step_index) in &lookup {
        let mut seen_dependencies = HashSet::new();
        for dependency in &steps[*step_index].depends_on {
            if dependency == step_key {
                return Err(CatalogError::SelfDependency(step_key.to_string()));
            }
            if !catalog_keys.contains(dependency.as_str()) {
                return Err(CatalogError::UnknownDependency {
                    step: step_key.to_string(),
                    dependency: dependency.clone(),
                });
            }
            let Some(dependency_index) = lookup.get(dependency.as_str()) else {
                continue;
            };
            if !seen_dependencies.insert(*dependency_index) {
                continue;
            }
            *in_degrees.entry(*step_index).or_default() += 1;
            adjacency.entry(*dependency_index).or_default().push(*step_index);
        }
    }

    let mut ready: BTreeSet<usize> = in_degrees
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(index, _)| *index)
        .collect();

    let mut ordered = Vec::with_capacity(lookup.len());
    while let Some(step_index) = ready.pop_first() {
        ordered.push(step_index);

        for child in adjacency.get(&step_index).into_iter().flatten() {
            if let Some(degree) = in_degrees.get_mut(child) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*child);
                }
            }
        }
    }

    if ordered.len() != lookup.len() {
        let mut remaining: Vec<String> = in_degrees
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(index, _)| steps[index].key.clone())
            .collect();
        remaining.sort();
        return Err(CatalogError::Cycle(remaining));
    }

    Ok(ordered)
}
