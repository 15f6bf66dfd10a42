//! Dependency graph builder.
//!
//! Computes, from static reads only, the read-set of every reactive statement
//! and the dependency set of every template expression, orders reactive
//! statements topologically and reports reactive cycles. The author never
//! declares dependencies; whatever a statement reads when it runs is what it
//! depends on. Reads inside nested functions do not count: they happen later,
//! not when the statement runs.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use serde::Serialize;

use crate::ast::{Ast, ExprId, NodeKind};
use crate::binder::{BindingKind, Bindings, Resolution};
use crate::diagnostic::{CompilerError, ErrorKind, ERR_DEPENDENCY_CYCLE};
use crate::scope::{LocalOrigin, ScopeId, ScopeTree};
use crate::script::ScriptAnalysis;

pub type DepSet = BTreeSet<String>;

/// Analysis results, keyed by reactive statement position and by `ExprId`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyInfo {
    /// Positions in `ScriptAnalysis::reactive`, in execution order.
    pub order: Vec<usize>,
    /// Reactive names each reactive statement reads when it runs.
    pub reactive_reads: Vec<DepSet>,
    /// Reactive names each reactive statement assigns.
    pub reactive_writes: Vec<DepSet>,
    /// Transitive reads of each Derived binding, through other Derived bindings.
    pub derived_roots: HashMap<String, DepSet>,
    #[serde(skip)]
    expr_deps: HashMap<ExprId, DepSet>,
}

impl DependencyInfo {
    pub fn expr_deps(&self, expr: ExprId) -> &DepSet {
        static EMPTY: DepSet = BTreeSet::new();
        self.expr_deps.get(&expr).unwrap_or(&EMPTY)
    }

    /// Union of the dependency sets of several expressions.
    pub fn union<'e>(&self, exprs: impl IntoIterator<Item = &'e ExprId>) -> DepSet {
        let mut out = DepSet::new();
        for expr in exprs {
            out.extend(self.expr_deps(*expr).iter().cloned());
        }
        out
    }
}

pub fn analyze(
    ast: &Ast,
    instance: Option<&ScriptAnalysis>,
    bindings: &Bindings,
    scopes: &ScopeTree,
) -> Result<DependencyInfo, Vec<CompilerError>> {
    let mut info = DependencyInfo::default();

    if let Some(instance) = instance {
        for reactive in &instance.reactive {
            let reads: DepSet = reactive
                .reads
                .iter()
                .filter(|name| bindings.is_reactive(name))
                .cloned()
                .collect();
            let writes: DepSet = reactive
                .assignees
                .iter()
                .filter(|name| bindings.is_reactive(name))
                .cloned()
                .collect();
            info.reactive_reads.push(reads);
            info.reactive_writes.push(writes);
        }

        let graph = build_graph(&info.reactive_reads, &info.reactive_writes);
        let cycles: Vec<CompilerError> = strongly_connected(&graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| cycle_error(instance, &info, &component))
            .collect();
        if !cycles.is_empty() {
            return Err(cycles);
        }
        info.order = topological_order(&graph);
        for (position, &i) in info.order.iter().enumerate() {
            tracing::trace!(position, statement = i, reads = ?info.reactive_reads[i], "reactive order");
        }

        for binding in bindings.instance().filter(|b| b.kind == BindingKind::Derived) {
            let mut roots = DepSet::new();
            collect_roots(&binding.name, &info, bindings, &mut roots, &mut Vec::new());
            info.derived_roots.insert(binding.name.clone(), roots);
        }
    }

    let expr_deps = {
        let mut resolver = ExprDeps {
            ast,
            bindings,
            scopes,
            info: &info,
            memo: HashMap::new(),
        };
        for expr in ast.expressions() {
            resolver.deps(expr.id);
        }
        resolver.memo
    };
    info.expr_deps = expr_deps;

    tracing::debug!(order = ?info.order, expressions = info.expr_deps.len(), "analysed dependencies");
    Ok(info)
}

/// `graph[j]` lists the statements that read something statement `j` writes.
fn build_graph(reads: &[DepSet], writes: &[DepSet]) -> Vec<Vec<usize>> {
    let n = reads.len();
    let mut graph = vec![Vec::new(); n];
    for producer in 0..n {
        for consumer in 0..n {
            if producer != consumer && !writes[producer].is_disjoint(&reads[consumer]) {
                graph[producer].push(consumer);
            }
        }
    }
    graph
}

/// Kahn's algorithm; among ready statements the earliest in source runs first.
fn topological_order(graph: &[Vec<usize>]) -> Vec<usize> {
    let mut in_degree = vec![0usize; graph.len()];
    for edges in graph {
        for &to in edges {
            in_degree[to] += 1;
        }
    }
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(graph.len());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &to in &graph[node] {
            in_degree[to] -= 1;
            if in_degree[to] == 0 {
                ready.push(Reverse(to));
            }
        }
    }
    order
}

/// Tarjan's strongly connected components.
fn strongly_connected(graph: &[Vec<usize>]) -> Vec<Vec<usize>> {
    struct State<'g> {
        graph: &'g [Vec<usize>],
        index: usize,
        indices: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        components: Vec<Vec<usize>>,
    }

    fn connect(state: &mut State, v: usize) {
        state.indices[v] = Some(state.index);
        state.lowlink[v] = state.index;
        state.index += 1;
        state.stack.push(v);
        state.on_stack[v] = true;

        let graph = state.graph;
        for &w in &graph[v] {
            match state.indices[w] {
                None => {
                    connect(state, w);
                    state.lowlink[v] = state.lowlink[v].min(state.lowlink[w]);
                }
                Some(index) if state.on_stack[w] => {
                    state.lowlink[v] = state.lowlink[v].min(index);
                }
                _ => {}
            }
        }

        if Some(state.lowlink[v]) == state.indices[v] {
            let mut component = Vec::new();
            while let Some(w) = state.stack.pop() {
                state.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            component.sort_unstable();
            state.components.push(component);
        }
    }

    let n = graph.len();
    let mut state = State {
        graph,
        index: 0,
        indices: vec![None; n],
        lowlink: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        components: Vec::new(),
    };
    for v in 0..n {
        if state.indices[v].is_none() {
            connect(&mut state, v);
        }
    }
    state.components.sort_by_key(|c| c[0]);
    state.components
}

fn cycle_error(instance: &ScriptAnalysis, info: &DependencyInfo, component: &[usize]) -> CompilerError {
    let mut names: Vec<&str> = Vec::new();
    for &i in component {
        for name in &info.reactive_writes[i] {
            let read_in_cycle = component.iter().any(|&j| j != i && info.reactive_reads[j].contains(name));
            if read_in_cycle && !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
    }
    let offset = instance.reactive[component[0]].span.start;
    CompilerError::new(
        ErrorKind::DependencyCycle,
        ERR_DEPENDENCY_CYCLE,
        format!("Cyclical dependency detected: {}", names.join(" → ")),
        offset,
    )
    .with_hint(format!("reactive declarations involved: {}", names.join(", ")))
}

fn collect_roots(name: &str, info: &DependencyInfo, bindings: &Bindings, out: &mut DepSet, visiting: &mut Vec<String>) {
    if visiting.iter().any(|v| v == name) {
        return;
    }
    visiting.push(name.to_string());
    for (i, writes) in info.reactive_writes.iter().enumerate() {
        if !writes.contains(name) {
            continue;
        }
        for read in &info.reactive_reads[i] {
            out.insert(read.clone());
            if bindings.kind_of(read) == Some(BindingKind::Derived) {
                collect_roots(read, info, bindings, out, visiting);
            }
        }
    }
    visiting.pop();
}

struct ExprDeps<'a> {
    ast: &'a Ast,
    bindings: &'a Bindings,
    scopes: &'a ScopeTree,
    info: &'a DependencyInfo,
    memo: HashMap<ExprId, DepSet>,
}

impl<'a> ExprDeps<'a> {
    fn deps(&mut self, expr: ExprId) -> DepSet {
        if let Some(deps) = self.memo.get(&expr) {
            return deps.clone();
        }
        let mut deps = DepSet::new();
        let references = &self.ast.expr(expr).info.references;
        let resolutions = self.bindings.resolutions(expr);
        for (reference, resolution) in references.iter().zip(resolutions) {
            match *resolution {
                Resolution::Binding(i) => {
                    let binding = &self.bindings.list[i];
                    if binding.kind.is_reactive() {
                        deps.insert(binding.name.clone());
                    }
                    if let Some(roots) = self.info.derived_roots.get(&binding.name) {
                        deps.extend(roots.iter().cloned());
                    }
                }
                Resolution::Local { scope, origin } => {
                    deps.extend(self.local_deps(scope, origin, &reference.name));
                }
                Resolution::Global | Resolution::Unresolved => {}
            }
        }
        self.memo.insert(expr, deps.clone());
        deps
    }

    /// A template local changes when the expression that introduced it does.
    fn local_deps(&mut self, scope: ScopeId, origin: LocalOrigin, name: &str) -> DepSet {
        let owner = self.scopes.scope(scope).owner;
        let source = match (origin, self.ast.kind(owner)) {
            (LocalOrigin::EachItem | LocalOrigin::EachIndex, NodeKind::EachBlock(block)) => Some(block.expression),
            (LocalOrigin::AwaitValue | LocalOrigin::AwaitError, _) => {
                self.ast.parent(owner).and_then(|p| match self.ast.kind(p) {
                    NodeKind::AwaitBlock(block) => Some(block.expression),
                    _ => None,
                })
            }
            (LocalOrigin::Event, _) => return DepSet::new(),
            _ => None,
        };
        let mut deps = match source {
            Some(expr) => self.deps(expr),
            None => DepSet::new(),
        };
        deps.insert(name.to_string());
        deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> DepSet {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_topological_order_prefers_source_order() {
        // 0 reads what 2 writes; 1 is unrelated.
        let reads = vec![set(&["b"]), set(&["x"]), set(&["a"])];
        let writes = vec![set(&["c"]), set(&["y"]), set(&["b"])];
        let graph = build_graph(&reads, &writes);
        assert_eq!(topological_order(&graph), vec![1, 2, 0]);
    }

    #[test]
    fn test_scc_finds_cycles() {
        let reads = vec![set(&["b"]), set(&["a"]), set(&["a"])];
        let writes = vec![set(&["a"]), set(&["b"]), set(&["c"])];
        let graph = build_graph(&reads, &writes);
        let components = strongly_connected(&graph);
        assert!(components.contains(&vec![0, 1]));
        assert!(components.contains(&vec![2]));
    }
}
