//! Dependency-ordered bodies
//!
//! Tasks run in parallel unless `dependencies` order them. Every edge is
//! checked as it is added: a dependency cycle is a construction error, so a
//! finished `DagBody` is always acyclic.
//!
//! Performance:
//! - Arc<str> for cheap cloning of task IDs
//! - FxHashMap for faster hashing
//! - SmallVec for stack-allocated small dependency lists (0-4 items)

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::debug;

use crate::error::{ForgeError, Result};
use crate::expr::Expr;
use crate::template::InputScope;
use crate::workflow::TemplateRegistry;

use super::call::{BodyKind, Call, CallContext, CallHandle, LoopSpec, Registration, TemplateRef, Visibility};
use super::{build_call, callee_outputs, CallRequest};

/// Stack-allocated deps: most tasks have 0-4 dependencies
pub type DepVec = SmallVec<[Arc<str>; 4]>;

/// Task dependency graph; edges point from a dependency to its dependents
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    /// task_id -> tasks that depend on it
    adjacency: FxHashMap<Arc<str>, DepVec>,
    /// task_id -> tasks it depends on
    predecessors: FxHashMap<Arc<str>, DepVec>,
    /// Insertion order
    task_ids: Vec<Arc<str>>,
}

impl DagGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already-added calls
    pub fn from_calls(calls: &[Call]) -> Self {
        let mut graph = Self::new();
        for call in calls {
            graph.add_task(&call.name);
        }
        for call in calls {
            for dep in &call.dependencies {
                graph.add_edge(dep, &call.name);
            }
        }
        graph
    }

    fn intern(&self, id: &str) -> Arc<str> {
        self.task_ids
            .iter()
            .find(|t| t.as_ref() == id)
            .cloned()
            .unwrap_or_else(|| Arc::from(id))
    }

    pub fn add_task(&mut self, id: &str) {
        if self.contains(id) {
            return;
        }
        let id: Arc<str> = Arc::from(id);
        self.task_ids.push(Arc::clone(&id));
        self.adjacency.insert(Arc::clone(&id), DepVec::new());
        self.predecessors.insert(id, DepVec::new());
    }

    /// `task` depends on `dependency`
    pub fn add_edge(&mut self, dependency: &str, task: &str) {
        let dep = self.intern(dependency);
        let task = self.intern(task);
        self.adjacency
            .entry(Arc::clone(&dep))
            .or_default()
            .push(Arc::clone(&task));
        self.predecessors.entry(task).or_default().push(dep);
    }

    fn remove_edge(&mut self, dependency: &str, task: &str) {
        if let Some(succ) = self.adjacency.get_mut(dependency) {
            if let Some(pos) = succ.iter().rposition(|t| t.as_ref() == task) {
                succ.remove(pos);
            }
        }
        if let Some(pred) = self.predecessors.get_mut(task) {
            if let Some(pos) = pred.iter().rposition(|t| t.as_ref() == dependency) {
                pred.remove(pos);
            }
        }
    }

    #[inline]
    pub fn contains(&self, id: &str) -> bool {
        self.predecessors.contains_key(id)
    }

    #[inline]
    pub fn get_dependencies(&self, task_id: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.predecessors
            .get(task_id)
            .map_or(EMPTY, SmallVec::as_slice)
    }

    /// Check if there's a path from `from` to `to` (BFS)
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }

        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut queue: VecDeque<&str> = VecDeque::new();

        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            if let Some(neighbors) = self.adjacency.get(current) {
                for neighbor in neighbors {
                    if neighbor.as_ref() == to {
                        return true;
                    }
                    if visited.insert(neighbor.as_ref()) {
                        queue.push_back(neighbor.as_ref());
                    }
                }
            }
        }

        false
    }

    /// Detect cycles using DFS with three-color marking.
    ///
    /// - White: unvisited
    /// - Gray: currently in DFS stack (visiting)
    /// - Black: fully processed (all descendants visited)
    ///
    /// A cycle is detected when we encounter a Gray node while traversing.
    /// The error carries the path, e.g. `a → c → a`.
    pub fn detect_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors: FxHashMap<Arc<str>, Color> = self
            .task_ids
            .iter()
            .map(|id| (Arc::clone(id), Color::White))
            .collect();
        let mut stack: Vec<Arc<str>> = Vec::new();

        fn dfs(
            node: Arc<str>,
            adjacency: &FxHashMap<Arc<str>, DepVec>,
            colors: &mut FxHashMap<Arc<str>, Color>,
            stack: &mut Vec<Arc<str>>,
        ) -> std::result::Result<(), String> {
            colors.insert(Arc::clone(&node), Color::Gray);
            stack.push(Arc::clone(&node));

            if let Some(neighbors) = adjacency.get(&node) {
                for neighbor in neighbors {
                    match colors.get(neighbor) {
                        Some(Color::Gray) => {
                            let cycle_start = stack
                                .iter()
                                .position(|x| x.as_ref() == neighbor.as_ref())
                                .unwrap_or(0);
                            let cycle: Vec<&str> =
                                stack[cycle_start..].iter().map(|s| s.as_ref()).collect();
                            return Err(format!("{} → {}", cycle.join(" → "), neighbor));
                        }
                        Some(Color::White) | None => {
                            dfs(Arc::clone(neighbor), adjacency, colors, stack)?;
                        }
                        Some(Color::Black) => {}
                    }
                }
            }

            stack.pop();
            colors.insert(node, Color::Black);
            Ok(())
        }

        for task_id in &self.task_ids {
            if colors.get(task_id) == Some(&Color::White) {
                if let Err(cycle) = dfs(
                    Arc::clone(task_id),
                    &self.adjacency,
                    &mut colors,
                    &mut stack,
                ) {
                    return Err(ForgeError::CycleDetected { cycle });
                }
            }
        }

        Ok(())
    }

    /// All transitive dependencies of `task`
    pub fn ancestors(&self, task: &str) -> FxHashSet<Arc<str>> {
        let mut seen: FxHashSet<Arc<str>> = FxHashSet::default();
        let mut queue: VecDeque<Arc<str>> = self.get_dependencies(task).iter().cloned().collect();
        while let Some(current) = queue.pop_front() {
            if seen.insert(Arc::clone(&current)) {
                queue.extend(self.get_dependencies(&current).iter().cloned());
            }
        }
        seen
    }

    /// Tasks grouped by earliest start: level 0 has no dependencies, level n
    /// depends only on levels < n. Within a level, insertion order is kept.
    pub fn execution_levels(&self) -> Vec<Vec<Arc<str>>> {
        let mut level_of: FxHashMap<&str, usize> = FxHashMap::default();
        let mut remaining: Vec<&Arc<str>> = self.task_ids.iter().collect();
        let mut levels: Vec<Vec<Arc<str>>> = Vec::new();

        while !remaining.is_empty() {
            let before = remaining.len();
            let mut placed = Vec::new();
            remaining.retain(|id| {
                let deps = self.get_dependencies(id);
                let ready = deps.iter().all(|d| level_of.contains_key(d.as_ref()));
                if ready {
                    let level = deps
                        .iter()
                        .filter_map(|d| level_of.get(d.as_ref()))
                        .map(|l| l + 1)
                        .max()
                        .unwrap_or(0);
                    placed.push((*id, level));
                }
                !ready
            });
            for (id, level) in placed {
                level_of.insert(id.as_ref(), level);
                if levels.len() <= level {
                    levels.resize_with(level + 1, Vec::new);
                }
                levels[level].push(Arc::clone(id));
            }
            // Only reachable with a cycle, which add_dependency rules out
            if remaining.len() == before {
                break;
            }
        }

        for level in &mut levels {
            level.sort_by_key(|id| self.task_ids.iter().position(|t| t == id));
        }
        levels
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub when: Option<Expr<bool>>,
    pub loop_with: Option<LoopSpec>,
    pub dependencies: Vec<String>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, cond: impl Into<Expr<bool>>) -> Self {
        self.when = Some(cond.into());
        self
    }

    pub fn loop_with(mut self, spec: LoopSpec) -> Self {
        self.loop_with = Some(spec);
        self
    }

    pub fn depends_on(mut self, tasks: &[&str]) -> Self {
        self.dependencies
            .extend(tasks.iter().map(|t| t.to_string()));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DagBody {
    pub tasks: Vec<Call>,
}

impl DagBody {
    pub fn find(&self, name: &str) -> Option<&Call> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn graph(&self) -> DagGraph {
        DagGraph::from_calls(&self.tasks)
    }
}

pub struct DagBuilder<'a> {
    template: &'a str,
    caller: InputScope,
    registry: &'a TemplateRegistry,
    body: DagBody,
    graph: DagGraph,
}

impl<'a> DagBuilder<'a> {
    pub(crate) fn new(template: &'a str, caller: InputScope, registry: &'a TemplateRegistry) -> Self {
        Self {
            template,
            caller,
            registry,
            body: DagBody::default(),
            graph: DagGraph::new(),
        }
    }

    pub(crate) fn finish(self) -> DagBody {
        self.body
    }

    pub fn inputs(&self) -> &InputScope {
        &self.caller
    }

    /// Add a task; every dependency must already exist
    pub fn add_task<F>(
        &mut self,
        name: &str,
        target: TemplateRef,
        register: F,
        options: TaskOptions,
    ) -> Result<CallHandle>
    where
        F: FnOnce(&CallContext<'_>) -> Result<Registration>,
    {
        if self.graph.contains(name) {
            return Err(ForgeError::DuplicateCallName {
                name: name.to_string(),
                template: self.template.to_string(),
            });
        }
        for dep in &options.dependencies {
            if !self.graph.contains(dep) {
                return Err(ForgeError::MissingDependency {
                    task_id: name.to_string(),
                    dep_id: dep.clone(),
                });
            }
        }

        // Upstream = direct dependencies plus their ancestors
        let mut upstream: FxHashSet<Arc<str>> = FxHashSet::default();
        for dep in &options.dependencies {
            upstream.insert(Arc::from(dep.as_str()));
            upstream.extend(self.graph.ancestors(dep));
        }

        let visibility = Visibility {
            kind: BodyKind::Dag,
            visible: self
                .body
                .tasks
                .iter()
                .filter(|t| upstream.contains(t.name.as_str()))
                .map(|t| (t.name.as_str(), self.registry.resolve(&t.target)))
                .collect(),
            blocked: self
                .body
                .tasks
                .iter()
                .filter(|t| !upstream.contains(t.name.as_str()))
                .map(|t| t.name.as_str())
                .collect(),
        };

        let outputs = callee_outputs(self.registry, &target);
        let call = build_call(
            self.registry,
            &self.caller,
            &visibility,
            CallRequest {
                name,
                target,
                when: options.when,
                loop_spec: options.loop_with,
                dependencies: options.dependencies,
            },
            register,
        )?;
        drop(visibility);

        self.graph.add_task(name);
        for dep in &call.dependencies {
            self.graph.add_edge(dep, name);
        }
        debug!(
            template = self.template,
            task = name,
            deps = call.dependencies.len(),
            "task added"
        );
        self.body.tasks.push(call);

        Ok(CallHandle {
            name: name.to_string(),
            kind: BodyKind::Dag,
            outputs,
        })
    }

    /// Make `task` depend on `on` after both were added
    ///
    /// Rejected without any change when the edge would close a cycle.
    pub fn add_dependency(&mut self, task: &str, on: &str) -> Result<()> {
        for id in [task, on] {
            if !self.graph.contains(id) {
                return Err(ForgeError::MissingDependency {
                    task_id: task.to_string(),
                    dep_id: id.to_string(),
                });
            }
        }

        self.graph.add_edge(on, task);
        if let Err(err) = self.graph.detect_cycles() {
            self.graph.remove_edge(on, task);
            return Err(err);
        }

        if let Some(call) = self.body.tasks.iter_mut().find(|t| t.name == task) {
            if !call.dependencies.iter().any(|d| d == on) {
                call.dependencies.push(on.to_string());
            }
        }
        Ok(())
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str)], tasks: &[&str]) -> DagGraph {
        let mut g = DagGraph::new();
        for t in tasks {
            g.add_task(t);
        }
        for (dep, task) in edges {
            g.add_edge(dep, task);
        }
        g
    }

    // ═══════════════════════════════════════════════════════════════
    // CYCLE DETECTION TESTS
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_detect_cycle_simple() {
        let g = graph(&[("a", "b"), ("b", "c"), ("c", "a")], &["a", "b", "c"]);
        let err = g.detect_cycles().unwrap_err();
        assert_eq!(err.code(), "FORGE-020");
        assert!(err.to_string().contains("→"));
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let g = graph(&[("a", "a")], &["a"]);
        assert!(g.detect_cycles().is_err());
    }

    #[test]
    fn test_diamond_no_cycle() {
        let g = graph(
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
            &["a", "b", "c", "d"],
        );
        assert!(g.detect_cycles().is_ok());
        assert!(g.has_path("a", "d"));
        assert!(!g.has_path("d", "a"));
    }

    // ═══════════════════════════════════════════════════════════════
    // LEVELS / ANCESTRY
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_execution_levels_fan_in() {
        let g = graph(&[("a", "c"), ("b", "c")], &["a", "b", "c"]);
        let levels: Vec<Vec<String>> = g
            .execution_levels()
            .into_iter()
            .map(|l| l.iter().map(|s| s.to_string()).collect())
            .collect();
        assert_eq!(levels, vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn test_ancestors_are_transitive() {
        let g = graph(&[("a", "b"), ("b", "c")], &["a", "b", "c"]);
        let anc = g.ancestors("c");
        assert!(anc.contains("a"));
        assert!(anc.contains("b"));
        assert!(!anc.contains("c"));
    }

    #[test]
    fn test_remove_edge_restores_acyclic() {
        let mut g = graph(&[("a", "c")], &["a", "c"]);
        g.add_edge("c", "a");
        assert!(g.detect_cycles().is_err());
        g.remove_edge("c", "a");
        assert!(g.detect_cycles().is_ok());
        assert_eq!(g.get_dependencies("c").len(), 1);
    }
}
