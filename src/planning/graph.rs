//! Dependency graph analysis: parallel levels, speedup and cycle reporting.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::subtask::{SubTask, SubTaskStatus};

/// Subtasks with no unresolved dependencies among themselves at one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelGroup {
    pub level: u32,
    pub subtask_ids: Vec<String>,
    /// Longest member duration.
    pub estimated_duration_minutes: u32,
    pub parallelizable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParallelPlan {
    pub groups: Vec<ParallelGroup>,
    pub speedup: f64,
    pub efficiency: f64,
    pub sequential_minutes: u32,
    pub parallel_minutes: u32,
    /// Subtasks left out because they sit on or behind a cycle.
    pub unscheduled: Vec<String>,
    pub warnings: Vec<String>,
}

impl ParallelPlan {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// First group that still has unfinished members.
    ///
    /// Groups run in level order, so nothing past this group may start.
    pub fn next_group(&self, subtasks: &[SubTask]) -> Option<&ParallelGroup> {
        let terminal: HashSet<&str> = subtasks
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.id.as_str())
            .collect();
        self.groups.iter().find(|g| {
            g.subtask_ids
                .iter()
                .any(|id| !terminal.contains(id.as_str()))
        })
    }
}

/// Partition subtasks into parallel levels using Kahn's algorithm.
///
/// Unknown dependency ids are removed from the subtasks with a warning.
/// Assigns `parallel_group` and `parallelizable` on every scheduled subtask.
pub fn plan_parallel_groups(subtasks: &mut [SubTask]) -> ParallelPlan {
    let mut warnings = Vec::new();
    if subtasks.is_empty() {
        return ParallelPlan {
            speedup: 1.0,
            efficiency: 1.0,
            ..ParallelPlan::default()
        };
    }

    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, st) in subtasks.iter().enumerate() {
        if index.insert(st.id.clone(), i).is_some() {
            warnings.push(format!("Duplicate subtask id {}; last definition wins", st.id));
        }
    }

    for st in subtasks.iter_mut() {
        let unknown: Vec<String> = st
            .dependencies
            .iter()
            .filter(|d| !index.contains_key(d.as_str()))
            .cloned()
            .collect();
        for dep in unknown {
            warn!(subtask_id = %st.id, dependency = %dep, "Dropping unknown dependency");
            warnings.push(format!(
                "Subtask {} depends on unknown subtask {dep}; dependency ignored",
                st.id
            ));
            st.dependencies.remove(&dep);
        }
    }

    let order: Vec<usize> = (0..subtasks.len())
        .filter(|i| index.get(&subtasks[*i].id) == Some(i))
        .collect();
    let durations: HashMap<String, u32> = order
        .iter()
        .map(|&i| (subtasks[i].id.clone(), subtasks[i].estimated_duration_minutes))
        .collect();

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for &i in &order {
        let st = &subtasks[i];
        in_degree.insert(st.id.as_str(), st.dependencies.len());
        for dep in &st.dependencies {
            dependents.entry(dep.as_str()).or_default().push(st.id.as_str());
        }
    }

    let mut levels: Vec<Vec<String>> = Vec::new();
    let mut frontier: Vec<&str> = order
        .iter()
        .map(|&i| subtasks[i].id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    while !frontier.is_empty() {
        let mut next: Vec<&str> = Vec::new();
        for id in &frontier {
            for child in dependents.get(id).map(Vec::as_slice).unwrap_or_default() {
                if let Some(deg) = in_degree.get_mut(child) {
                    *deg -= 1;
                    if *deg == 0 {
                        next.push(*child);
                    }
                }
            }
        }
        next.sort_by_key(|id| index.get(*id).copied().unwrap_or(usize::MAX));
        levels.push(frontier.iter().map(|s| s.to_string()).collect());
        frontier = next;
    }

    let scheduled: HashSet<&str> = levels.iter().flatten().map(String::as_str).collect();
    let unscheduled: Vec<String> = order
        .iter()
        .map(|&i| subtasks[i].id.clone())
        .filter(|id| !scheduled.contains(id.as_str()))
        .collect();

    if !unscheduled.is_empty() {
        let remaining: BTreeMap<&str, Vec<&str>> = order
            .iter()
            .map(|&i| &subtasks[i])
            .filter(|st| !scheduled.contains(st.id.as_str()))
            .map(|st| {
                (
                    st.id.as_str(),
                    st.dependencies.iter().map(String::as_str).collect(),
                )
            })
            .collect();
        let cycle = find_cycle(&remaining)
            .map(|path| path.join(" -> "))
            .unwrap_or_else(|| "unresolved dependencies".to_string());
        warn!(count = unscheduled.len(), cycle = %cycle, "Cyclic subtask dependencies excluded from plan");
        warnings.push(format!(
            "Circular dependency ({cycle}); excluded from plan: {}",
            unscheduled.join(", ")
        ));
    }

    let duration_of = |id: &str| durations.get(id).copied().unwrap_or(0);

    let groups: Vec<ParallelGroup> = levels
        .into_iter()
        .enumerate()
        .map(|(level, ids)| ParallelGroup {
            level: level as u32,
            estimated_duration_minutes: ids.iter().map(|id| duration_of(id)).max().unwrap_or(0),
            parallelizable: ids.len() >= 2,
            subtask_ids: ids,
        })
        .collect();

    for group in &groups {
        for id in &group.subtask_ids {
            if let Some(&i) = index.get(id) {
                subtasks[i].parallel_group = Some(group.level);
                subtasks[i].parallelizable = group.parallelizable;
            }
        }
    }

    let sequential_minutes: u32 = groups
        .iter()
        .flat_map(|g| g.subtask_ids.iter())
        .map(|id| duration_of(id))
        .sum();
    let parallel_minutes: u32 = groups.iter().map(|g| g.estimated_duration_minutes).sum();
    let speedup = if parallel_minutes == 0 {
        1.0
    } else {
        (sequential_minutes as f64 / parallel_minutes as f64).max(1.0)
    };
    let efficiency = if groups.is_empty() {
        1.0
    } else {
        speedup / groups.len() as f64
    };

    debug!(
        levels = groups.len(),
        speedup,
        sequential_minutes,
        parallel_minutes,
        "Parallel plan computed"
    );

    ParallelPlan {
        groups,
        speedup,
        efficiency,
        sequential_minutes,
        parallel_minutes,
        unscheduled,
        warnings,
    }
}

/// Pending subtasks whose dependencies have all completed.
pub fn ready_subtasks(subtasks: &[SubTask]) -> Vec<&SubTask> {
    let completed: HashSet<String> = subtasks
        .iter()
        .filter(|s| s.status() == SubTaskStatus::Completed)
        .map(|s| s.id.clone())
        .collect();
    subtasks.iter().filter(|s| s.is_ready(&completed)).collect()
}

/// DFS cycle search; returns the path closing the first cycle found.
fn find_cycle(graph: &BTreeMap<&str, Vec<&str>>) -> Option<Vec<String>> {
    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    let mut path = Vec::new();

    for node in graph.keys() {
        if visit(node, graph, &mut visited, &mut on_stack, &mut path) {
            return Some(path);
        }
    }
    None
}

fn visit<'a>(
    node: &'a str,
    graph: &BTreeMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    on_stack: &mut HashSet<&'a str>,
    path: &mut Vec<String>,
) -> bool {
    if on_stack.contains(node) {
        path.push(node.to_string());
        return true;
    }
    if !visited.insert(node) {
        return false;
    }

    on_stack.insert(node);
    path.push(node.to_string());

    if let Some(deps) = graph.get(node) {
        for dep in deps {
            if visit(dep, graph, visited, on_stack, path) {
                return true;
            }
        }
    }

    on_stack.remove(node);
    path.pop();
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn st(id: &str, minutes: u32, deps: &[&str]) -> SubTask {
        SubTask::new(id, "t", format!("work {id}"))
            .unwrap()
            .with_duration(minutes)
            .with_dependencies(deps.iter().copied())
            .unwrap()
    }

    #[test]
    fn test_empty_plan() {
        let plan = plan_parallel_groups(&mut []);
        assert!(plan.is_empty());
        assert_eq!(plan.speedup, 1.0);
    }

    #[test]
    fn test_single_subtask_speedup_is_one() {
        let mut tasks = vec![st("a", 30, &[])];
        let plan = plan_parallel_groups(&mut tasks);
        assert_eq!(plan.groups.len(), 1);
        assert!(!plan.groups[0].parallelizable);
        assert_eq!(plan.speedup, 1.0);
        assert_eq!(tasks[0].parallel_group, Some(0));
    }

    #[test]
    fn test_diamond_levels() {
        let mut tasks = vec![
            st("a", 10, &[]),
            st("b", 20, &["a"]),
            st("c", 30, &["a"]),
            st("d", 10, &["b", "c"]),
        ];
        let plan = plan_parallel_groups(&mut tasks);
        let ids: Vec<Vec<&str>> = plan
            .groups
            .iter()
            .map(|g| g.subtask_ids.iter().map(String::as_str).collect())
            .collect();
        assert_eq!(ids, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
        assert!(plan.groups[1].parallelizable);
        assert_eq!(plan.groups[1].estimated_duration_minutes, 30);
        assert_eq!(plan.sequential_minutes, 70);
        assert_eq!(plan.parallel_minutes, 50);
        assert!((plan.speedup - 1.4).abs() < 1e-9);
        assert!((plan.efficiency - 1.4 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_dependency_dropped_with_warning() {
        let mut tasks = vec![st("a", 10, &["ghost"]), st("b", 10, &[])];
        let plan = plan_parallel_groups(&mut tasks);
        assert_eq!(plan.groups.len(), 1);
        assert!(plan.warnings.iter().any(|w| w.contains("ghost")));
        assert!(tasks[0].dependencies.is_empty());
    }

    #[test]
    fn test_cycle_is_reported_not_scheduled() {
        let mut tasks = vec![
            st("a", 10, &[]),
            st("b", 10, &["c"]),
            st("c", 10, &["b"]),
            st("d", 10, &["c"]),
        ];
        let plan = plan_parallel_groups(&mut tasks);
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.unscheduled, vec!["b", "c", "d"]);
        assert!(plan.warnings.iter().any(|w| w.contains("Circular dependency")));
        assert_eq!(tasks[1].parallel_group, None);
    }

    #[test]
    fn test_find_cycle_self_loop() {
        let mut graph = BTreeMap::new();
        graph.insert("a", vec!["a"]);
        assert!(find_cycle(&graph).is_some());
    }

    #[test]
    fn test_ready_subtasks_and_next_group() {
        let mut tasks = vec![st("a", 10, &[]), st("b", 10, &["a"])];
        let plan = plan_parallel_groups(&mut tasks);
        assert_eq!(ready_subtasks(&tasks).len(), 1);
        assert_eq!(plan.next_group(&tasks).map(|g| g.level), Some(0));

        tasks[0].start(None).unwrap();
        tasks[0].complete().unwrap();
        let ready: Vec<&str> = ready_subtasks(&tasks)
            .into_iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ready, vec!["b"]);
        assert_eq!(plan.next_group(&tasks).map(|g| g.level), Some(1));
    }
}
