//! The dependency builder (§4.6): a modified Kahn topological sort with
//! conflict-aware batch admission. Produces an ordered list of batches plus any
//! non-fatal cycle/deadlock diagnostics.

use std::collections::{HashMap, HashSet};

use crate::ecs::component::ComponentTypeName;
use crate::ecs::error::ScheduleError;
use crate::ecs::system::{Access, DependencyInfo};

/// An unordered set of system names proven conflict-free and safe to run
/// concurrently.
pub type Batch = Vec<String>;

/// Builds the batch plan for `descriptors`, breaking group-id ties by `order`
/// (the order systems were registered in). Generic over [`DependencyInfo`] so the
/// scheduler can pass either live descriptors or a lock-free snapshot of them.
pub fn build<T: DependencyInfo>(
    descriptors: &HashMap<String, T>,
    order: &[String],
) -> (Vec<Batch>, Vec<ScheduleError>) {
    let index_of: HashMap<&str, usize> = order.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
    let group_of = |name: &str| descriptors.get(name).map(T::group_id).unwrap_or(0);
    let sort_by_group = |names: &mut Vec<String>| {
        names.sort_by_key(|n| (group_of(n), index_of.get(n.as_str()).copied().unwrap_or(usize::MAX)));
    };

    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut in_degree: HashMap<String, usize> = order.iter().map(|n| (n.clone(), 0)).collect();

    for name in order {
        let Some(desc) = descriptors.get(name) else {
            continue;
        };
        for successor in desc.before_edges() {
            adjacency.entry(name.clone()).or_default().push(successor.clone());
            *in_degree.entry(successor.clone()).or_insert(0) += 1;
        }
        for predecessor in desc.after_edges() {
            adjacency.entry(predecessor.clone()).or_default().push(name.clone());
            *in_degree.entry(name.clone()).or_insert(0) += 1;
        }
    }

    let mut remaining = in_degree.clone();
    let mut ready: Vec<String> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(name, _)| name.clone())
        .collect();
    sort_by_group(&mut ready);

    let mut placed: HashSet<String> = HashSet::new();
    let mut batches: Vec<Batch> = Vec::new();
    let mut errors: Vec<ScheduleError> = Vec::new();
    let total = order.len();

    while placed.len() < total {
        if ready.is_empty() {
            let unplaced: Vec<String> = order.iter().filter(|n| !placed.contains(*n)).cloned().collect();
            errors.push(ScheduleError::Cycle(unplaced));
            break;
        }

        let mut reads: HashSet<ComponentTypeName> = HashSet::new();
        let mut writes: HashSet<ComponentTypeName> = HashSet::new();
        let mut admitted: Batch = Vec::new();
        let mut rejected: Vec<String> = Vec::new();

        for name in ready.drain(..) {
            let Some(desc) = descriptors.get(&name) else {
                admitted.push(name);
                continue;
            };
            let conflicts = desc.access().iter().any(|(component, access)| match access {
                Access::ReadOnly => writes.contains(component),
                Access::ReadWrite => writes.contains(component) || reads.contains(component),
            });

            if conflicts {
                rejected.push(name);
                continue;
            }
            for (component, access) in desc.access() {
                match access {
                    Access::ReadOnly => {
                        reads.insert(component.clone());
                    }
                    Access::ReadWrite => {
                        writes.insert(component.clone());
                    }
                }
            }
            admitted.push(name);
        }

        if admitted.is_empty() {
            errors.push(ScheduleError::Deadlock(rejected));
            break;
        }

        for name in &admitted {
            placed.insert(name.clone());
        }

        let mut unlocked: Vec<String> = Vec::new();
        for name in &admitted {
            let Some(successors) = adjacency.get(name) else {
                continue;
            };
            for successor in successors {
                if let Some(degree) = remaining.get_mut(successor) {
                    *degree -= 1;
                    if *degree == 0 {
                        unlocked.push(successor.clone());
                    }
                }
            }
        }
        sort_by_group(&mut unlocked);

        batches.push(admitted);
        ready = rejected;
        ready.extend(unlocked);
    }

    (batches, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::system::SystemDescriptor;

    fn descriptor(name: &str) -> SystemDescriptor {
        SystemDescriptor::new(name, |_, _| {})
    }

    fn names(descs: &[SystemDescriptor]) -> Vec<String> {
        descs.iter().map(|d| d.name().to_string()).collect()
    }

    fn into_map(descs: Vec<SystemDescriptor>) -> HashMap<String, SystemDescriptor> {
        descs.into_iter().map(|d| (d.name().to_string(), d)).collect()
    }

    // S6 - WW/RW separation, no explicit edges
    #[test]
    fn conflicting_writers_and_readers_spread_across_batches() {
        let descs = vec![
            descriptor("A").writes("C1"),
            descriptor("B").writes("C1"),
            descriptor("C").reads("C1"),
            descriptor("D").reads("C1"),
        ];
        let order = names(&descs);
        let map = into_map(descs);
        let (batches, errors) = build(&map, &order);

        assert!(errors.is_empty());
        assert!(batches.len() >= 3);

        let batch_of = |n: &str| batches.iter().position(|b| b.iter().any(|x| x == n)).unwrap();
        assert_ne!(batch_of("A"), batch_of("B"));
        assert_ne!(batch_of("A"), batch_of("C"));
        assert_ne!(batch_of("B"), batch_of("C"));
        assert_eq!(batch_of("C"), batch_of("D"));
    }

    // S7 - diamond explicit dependency
    #[test]
    fn diamond_dependency_respects_every_edge() {
        let descs = vec![
            descriptor("Start").writes("S").before("Left").before("Right"),
            descriptor("Left").writes("L").after("Start").before("End"),
            descriptor("Right").writes("R").after("Start").before("End"),
            descriptor("End").writes("E").after("Left").after("Right"),
        ];
        let order = names(&descs);
        let map = into_map(descs);
        let (batches, errors) = build(&map, &order);
        assert!(errors.is_empty());

        let batch_of = |n: &str| batches.iter().position(|b| b.iter().any(|x| x == n)).unwrap();
        assert!(batch_of("Start") < batch_of("Left"));
        assert!(batch_of("Start") < batch_of("Right"));
        assert!(batch_of("Left") < batch_of("End"));
        assert!(batch_of("Right") < batch_of("End"));
    }

    // S8 - cycle detection
    #[test]
    fn cycle_is_detected_and_does_not_hang() {
        let descs = vec![
            descriptor("A").writes("X").after("B"),
            descriptor("B").writes("X").after("A"),
        ];
        let order = names(&descs);
        let map = into_map(descs);
        let (batches, errors) = build(&map, &order);

        assert!(matches!(errors.as_slice(), [ScheduleError::Cycle(_)]));
        let both_present = batches.iter().any(|b| b.contains(&"A".to_string()))
            && batches.iter().any(|b| b.contains(&"B".to_string()));
        assert!(!both_present);
    }

    // S9 - scale
    #[test]
    fn hundred_systems_on_one_component_respect_chain_and_fan_out() {
        let mut descs = Vec::new();
        descs.push(descriptor("Sys_0").writes("Shared"));
        for i in 1..100 {
            let mut d = descriptor(&format!("Sys_{i}")).reads("Shared");
            if i % 2 == 0 {
                d = d.after(format!("Sys_{}", i - 2));
            } else {
                d = d.after("Sys_0");
            }
            descs.push(d);
        }
        let order = names(&descs);
        let map = into_map(descs);
        let (batches, errors) = build(&map, &order);
        assert!(errors.is_empty());

        let batch_of = |n: &str| batches.iter().position(|b| b.iter().any(|x| x == n)).unwrap();
        let sys0 = batch_of("Sys_0");

        let mut prev = sys0;
        for i in (2..100).step_by(2) {
            let current = batch_of(&format!("Sys_{i}"));
            assert!(current > prev);
            prev = current;
        }
        for i in (1..100).step_by(2) {
            assert!(batch_of(&format!("Sys_{i}")) > sys0);
        }
    }
}
