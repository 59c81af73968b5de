//! Typed state-machine model and the graph builder.
//!
//! The model is a directed multigraph over [`petgraph::graph::DiGraph`]:
//! states are nodes, transitions are edges, and parallel edges between the
//! same ordered pair are allowed as long as their events differ. Everything
//! is built once from the AST, then frozen — the verifier, the scenario
//! synthesizer and the emitter only read.
//!
//! Iteration is index-ordered everywhere (petgraph indices follow insertion
//! order), which is what keeps the generated artifacts byte-stable. The
//! per-node adjacency iterators of petgraph walk edges most-recent-first, so
//! [`Machine::outgoing`] and [`Machine::incoming`] filter the global edge
//! list instead.

use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::error::{ScError, ScResult};
use crate::parser::ast::{Decl, Pos, StateActionKind, StateRef};

/// The tagged state sum: the two pseudo-states are variants, not magic
/// identifier strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateKind {
    Initial,
    Final,
    Normal(String),
}

/// A state and the actions it owns.
#[derive(Debug, Clone)]
pub struct State {
    pub kind: StateKind,
    /// Entry-action bodies in declaration order.
    pub entry: Vec<String>,
    /// Exit-action bodies in declaration order.
    pub exit: Vec<String>,
    /// Human comment attached with `State : comment / ...`.
    pub comment: Option<String>,
    /// Line of first mention, for diagnostics.
    pub line: u32,
}

impl State {
    fn new(kind: StateKind, line: u32) -> Self {
        Self { kind, entry: Vec::new(), exit: Vec::new(), comment: None, line }
    }

    /// Source spelling of the state: `[*]` for both pseudo-states.
    #[must_use]
    pub fn name(&self) -> &str {
        match &self.kind {
            StateKind::Initial | StateKind::Final => "[*]",
            StateKind::Normal(name) => name,
        }
    }

    #[must_use]
    pub fn is_pseudo(&self) -> bool {
        !matches!(self.kind, StateKind::Normal(_))
    }
}

/// An event with its opaque parameter-list text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub params: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    External,
    /// Self-transition declared with `State : on ...`; entry/exit never fire.
    Internal,
    /// No triggering event; taken when the source state is entered.
    Completion,
}

/// An edge of the machine. Guard and action bodies are opaque text.
#[derive(Debug, Clone)]
pub struct Transition {
    pub event: Option<Event>,
    pub guard: Option<String>,
    pub action: Option<String>,
    pub kind: TransitionKind,
    pub line: u32,
}

impl Transition {
    #[must_use]
    pub fn is_completion(&self) -> bool {
        self.event.is_none()
    }

    /// Event name, empty for completion transitions.
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.event.as_ref().map_or("", |e| e.name.as_str())
    }
}

/// Verbatim embedded-code slots, one `Vec` entry per directive line.
#[derive(Debug, Clone, Default)]
pub struct ExtraCode {
    pub header: Vec<String>,
    pub footer: Vec<String>,
    pub params: Vec<String>,
    pub cons: Vec<String>,
    pub init: Vec<String>,
    pub code: Vec<String>,
    pub test: Vec<String>,
    pub brief: Vec<String>,
}

/// The frozen machine: a named multigraph plus its embedded-code slots.
#[derive(Debug)]
pub struct Machine {
    pub name: String,
    graph: DiGraph<State, Transition>,
    by_name: HashMap<String, NodeIndex>,
    pub initial: Option<NodeIndex>,
    pub final_state: Option<NodeIndex>,
    pub extra: ExtraCode,
}

impl Machine {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            graph: DiGraph::new(),
            by_name: HashMap::new(),
            initial: None,
            final_state: None,
            extra: ExtraCode::default(),
        }
    }

    #[must_use]
    pub fn state(&self, ix: NodeIndex) -> &State {
        &self.graph[ix]
    }

    #[must_use]
    pub fn transition(&self, ix: EdgeIndex) -> &Transition {
        &self.graph[ix]
    }

    /// (source, destination) of an edge.
    #[must_use]
    pub fn endpoints(&self, ix: EdgeIndex) -> (NodeIndex, NodeIndex) {
        self.graph
            .edge_endpoints(ix)
            .expect("edge index out of bounds")
    }

    /// States in declaration order.
    pub fn states(&self) -> impl Iterator<Item = NodeIndex> {
        self.graph.node_indices()
    }

    /// Transitions in declaration order.
    pub fn transitions(&self) -> impl Iterator<Item = EdgeIndex> {
        self.graph.edge_indices()
    }

    #[must_use]
    pub fn state_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn transition_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Normal (non-pseudo) states, declaration order.
    pub fn normal_states(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph
            .node_indices()
            .filter(|&n| !self.graph[n].is_pseudo())
    }

    /// Outgoing edges of a node in declaration order.
    #[must_use]
    pub fn outgoing(&self, n: NodeIndex) -> Vec<EdgeIndex> {
        self.graph
            .edge_references()
            .filter(|e| e.source() == n)
            .map(|e| e.id())
            .collect()
    }

    /// Incoming edges of a node in declaration order.
    #[must_use]
    pub fn incoming(&self, n: NodeIndex) -> Vec<EdgeIndex> {
        self.graph
            .edge_references()
            .filter(|e| e.target() == n)
            .map(|e| e.id())
            .collect()
    }

    /// Eventful transitions grouped by event name, both edge lists and event
    /// order deterministic (declaration order within a sorted name map).
    #[must_use]
    pub fn events(&self) -> BTreeMap<String, Vec<EdgeIndex>> {
        let mut map: BTreeMap<String, Vec<EdgeIndex>> = BTreeMap::new();
        for e in self.graph.edge_indices() {
            if let Some(event) = &self.graph[e].event {
                map.entry(event.name.clone()).or_default().push(e);
            }
        }
        map
    }

    /// Nodes reachable from the initial pseudo-state.
    #[must_use]
    pub fn reachable(&self) -> HashSet<NodeIndex> {
        let mut seen = HashSet::new();
        let Some(start) = self.initial else {
            return seen;
        };
        let mut stack = vec![start];
        seen.insert(start);
        while let Some(n) = stack.pop() {
            for e in self.outgoing(n) {
                let (_, tgt) = self.endpoints(e);
                if seen.insert(tgt) {
                    stack.push(tgt);
                }
            }
        }
        seen
    }

    /// All node-simple edge cycles of length at most `max_len`, in
    /// deterministic order. Each cycle is reported once, rooted at its
    /// smallest node index; self-loops count as cycles of length one.
    #[must_use]
    pub fn simple_cycles(&self, max_len: usize) -> Vec<Vec<EdgeIndex>> {
        let mut out = Vec::new();
        for root in self.graph.node_indices() {
            let mut walk = Vec::new();
            let mut on_path = HashSet::new();
            on_path.insert(root);
            self.cycle_dfs(root, root, max_len, &mut walk, &mut on_path, &mut out);
        }
        out
    }

    fn cycle_dfs(
        &self,
        root: NodeIndex,
        cur: NodeIndex,
        max_len: usize,
        walk: &mut Vec<EdgeIndex>,
        on_path: &mut HashSet<NodeIndex>,
        out: &mut Vec<Vec<EdgeIndex>>,
    ) {
        if walk.len() == max_len {
            return;
        }
        for e in self.outgoing(cur) {
            let (_, tgt) = self.endpoints(e);
            if tgt.index() < root.index() {
                continue;
            }
            if tgt == root {
                walk.push(e);
                out.push(walk.clone());
                walk.pop();
            } else if !on_path.contains(&tgt) {
                walk.push(e);
                on_path.insert(tgt);
                self.cycle_dfs(root, tgt, max_len, walk, on_path, out);
                on_path.remove(&tgt);
                walk.pop();
            }
        }
    }

    /// All node-simple edge paths from the initial pseudo-state to a sink
    /// (the final pseudo-state, or a state with no outgoing non-self edges),
    /// bounded by `max_len` edges. Self-loops are not traversed; the cycle
    /// enumeration covers them.
    #[must_use]
    pub fn paths_to_sinks(&self, max_len: usize) -> Vec<Vec<EdgeIndex>> {
        let mut out = Vec::new();
        let Some(start) = self.initial else {
            return out;
        };
        let mut walk = Vec::new();
        let mut on_path = HashSet::new();
        on_path.insert(start);
        self.path_dfs(start, max_len, &mut walk, &mut on_path, &mut out);
        out
    }

    #[must_use]
    fn is_sink(&self, n: NodeIndex) -> bool {
        if self.graph[n].kind == StateKind::Final {
            return true;
        }
        self.outgoing(n)
            .iter()
            .all(|&e| self.endpoints(e).1 == n)
    }

    fn path_dfs(
        &self,
        cur: NodeIndex,
        max_len: usize,
        walk: &mut Vec<EdgeIndex>,
        on_path: &mut HashSet<NodeIndex>,
        out: &mut Vec<Vec<EdgeIndex>>,
    ) {
        if walk.len() == max_len {
            return;
        }
        for e in self.outgoing(cur) {
            let (_, tgt) = self.endpoints(e);
            if tgt == cur || on_path.contains(&tgt) {
                continue;
            }
            walk.push(e);
            if self.is_sink(tgt) {
                out.push(walk.clone());
            } else {
                on_path.insert(tgt);
                self.path_dfs(tgt, max_len, walk, on_path, out);
                on_path.remove(&tgt);
            }
            walk.pop();
        }
    }

    fn intern(&mut self, state: &StateRef, line: u32) -> NodeIndex {
        match state {
            StateRef::Initial => match self.initial {
                Some(ix) => ix,
                None => {
                    let ix = self.graph.add_node(State::new(StateKind::Initial, line));
                    self.initial = Some(ix);
                    ix
                }
            },
            StateRef::Final => match self.final_state {
                Some(ix) => ix,
                None => {
                    let ix = self.graph.add_node(State::new(StateKind::Final, line));
                    self.final_state = Some(ix);
                    ix
                }
            },
            StateRef::Named(name) => match self.by_name.get(name) {
                Some(&ix) => ix,
                None => {
                    let ix = self
                        .graph
                        .add_node(State::new(StateKind::Normal(name.clone()), line));
                    self.by_name.insert(name.clone(), ix);
                    ix
                }
            },
        }
    }

    #[cfg(test)]
    pub(crate) fn node_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.by_name.get(name).copied()
    }
}

/// Fold the AST into a machine. Aborts on the first shape error (duplicate
/// parallel edge, transition leaving the final pseudo-state).
pub fn build(name: impl Into<String>, decls: &[Decl], file: &str) -> ScResult<Machine> {
    let mut m = Machine::new(name);
    let mut seen: HashSet<(NodeIndex, NodeIndex, String)> = HashSet::new();

    for decl in decls {
        match decl {
            Decl::Transition(tr) => {
                let Pos { line, .. } = tr.pos;
                let src = m.intern(&tr.source, line);
                let dst = m.intern(&tr.destination, line);
                let event_name = tr.event.as_ref().map_or(String::new(), |e| e.name.clone());
                if !seen.insert((src, dst, event_name.clone())) {
                    return Err(ScError::Shape {
                        file: file.to_string(),
                        line,
                        message: format!(
                            "duplicate transition {} -> {} on {}",
                            m.state(src).name(),
                            m.state(dst).name(),
                            if event_name.is_empty() {
                                "completion".to_string()
                            } else {
                                format!("event '{event_name}'")
                            }
                        ),
                    });
                }
                let kind = if tr.internal {
                    TransitionKind::Internal
                } else if tr.event.is_none() {
                    TransitionKind::Completion
                } else {
                    TransitionKind::External
                };
                let edge = Transition {
                    event: tr.event.as_ref().map(|e| Event {
                        name: e.name.clone(),
                        params: e.params.clone(),
                    }),
                    guard: tr.guard.clone(),
                    action: tr.action.clone(),
                    kind,
                    line,
                };
                m.graph.add_edge(src, dst, edge);
            }
            Decl::StateAction(sa) => {
                let ix = m.intern(&StateRef::Named(sa.state.clone()), sa.pos.line);
                let state = &mut m.graph[ix];
                match sa.kind {
                    StateActionKind::Entry => state.entry.push(sa.body.clone()),
                    StateActionKind::Exit => state.exit.push(sa.body.clone()),
                    StateActionKind::Comment => match &mut state.comment {
                        Some(c) => {
                            c.push(' ');
                            c.push_str(&sa.body);
                        }
                        None => state.comment = Some(sa.body.clone()),
                    },
                }
            }
            Decl::Slot(slot) => {
                use crate::parser::ast::Slot as S;
                let bucket = match slot.slot {
                    S::Header => &mut m.extra.header,
                    S::Footer => &mut m.extra.footer,
                    S::Param => &mut m.extra.params,
                    S::Cons => &mut m.extra.cons,
                    S::Init => &mut m.extra.init,
                    S::Code => &mut m.extra.code,
                    S::Test => &mut m.extra.test,
                    S::Brief => &mut m.extra.brief,
                };
                bucket.push(slot.text.clone());
            }
        }
    }

    tracing::debug!(
        states = m.state_count(),
        transitions = m.transition_count(),
        "built machine {}",
        m.name
    );
    Ok(m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Diagnostics;
    use crate::parser;

    fn machine(text: &str) -> Machine {
        let mut diags = Diagnostics::new();
        let decls = parser::parse("test.plantuml", text, &mut diags).unwrap();
        build("Test", &decls, "test.plantuml").unwrap()
    }

    const MOTOR: &str = "@startuml\n\
        [*] --> Idle\n\
        Idle --> Starting : setSpeed\n\
        Starting --> Spinning : setSpeed\n\
        Starting --> Stopping : halt\n\
        Spinning --> Stopping : halt\n\
        Stopping --> Idle\n\
        @enduml\n";

    #[test]
    fn test_graph_fidelity() {
        let m = machine(MOTOR);
        // one node per distinct state plus the initial pseudo-state
        assert_eq!(m.state_count(), 5);
        assert_eq!(m.transition_count(), 6);
        // every source transition is exactly one edge with matching fields
        let idle = m.node_by_name("Idle").unwrap();
        let out = m.outgoing(idle);
        assert_eq!(out.len(), 1);
        let tr = m.transition(out[0]);
        assert_eq!(tr.event_name(), "setSpeed");
        assert_eq!(tr.kind, TransitionKind::External);
    }

    #[test]
    fn test_initial_and_completion() {
        let m = machine(MOTOR);
        let initial = m.initial.unwrap();
        assert_eq!(m.state(initial).kind, StateKind::Initial);
        let out = m.outgoing(initial);
        assert_eq!(out.len(), 1);
        assert!(m.transition(out[0]).is_completion());
    }

    #[test]
    fn test_entry_exit_appended_in_order() {
        let m = machine(
            "@startuml\n\
             [*] --> A\n\
             A : entry / first()\n\
             A : entering / second()\n\
             A : leaving / bye()\n\
             A --> A : tick\n\
             @enduml\n",
        );
        let a = m.node_by_name("A").unwrap();
        assert_eq!(m.state(a).entry, vec!["first()", "second()"]);
        assert_eq!(m.state(a).exit, vec!["bye()"]);
    }

    #[test]
    fn test_internal_reaction_edge() {
        let m = machine(
            "@startuml\n\
             [*] --> A\n\
             A : on ping / pong()\n\
             A --> B : go\n\
             @enduml\n",
        );
        let a = m.node_by_name("A").unwrap();
        let internal: Vec<_> = m
            .outgoing(a)
            .into_iter()
            .filter(|&e| m.transition(e).kind == TransitionKind::Internal)
            .collect();
        assert_eq!(internal.len(), 1);
        assert_eq!(m.endpoints(internal[0]), (a, a));
    }

    #[test]
    fn test_duplicate_edge_rejected() {
        let mut diags = Diagnostics::new();
        let decls = parser::parse(
            "t",
            "@startuml\n[*] --> A\nA --> B : go\nA --> B : go\n@enduml\n",
            &mut diags,
        )
        .unwrap();
        let err = build("Test", &decls, "t").unwrap_err();
        assert!(matches!(err, ScError::Shape { line: 4, .. }));
    }

    #[test]
    fn test_parallel_edges_with_distinct_events_allowed() {
        let m = machine("@startuml\n[*] --> A\nA --> B : go\nA --> B : run\n@enduml\n");
        let a = m.node_by_name("A").unwrap();
        assert_eq!(m.outgoing(a).len(), 2);
    }

    #[test]
    fn test_final_pseudo_state_interned_once() {
        let m = machine("@startuml\n[*] --> A\nA --> [*] : quit\nA --> B : go\nB --> [*] : quit\n@enduml\n");
        let f = m.final_state.unwrap();
        assert_eq!(m.state(f).kind, StateKind::Final);
        assert_eq!(m.incoming(f).len(), 2);
        assert!(m.outgoing(f).is_empty());
    }

    #[test]
    fn test_events_grouping_sorted_and_ordered() {
        let m = machine(MOTOR);
        let events = m.events();
        let names: Vec<_> = events.keys().cloned().collect();
        assert_eq!(names, vec!["halt", "setSpeed"]);
        assert_eq!(events["setSpeed"].len(), 2);
        // declaration order within the group
        let first = m.endpoints(events["setSpeed"][0]).0;
        assert_eq!(m.state(first).name(), "Idle");
    }

    #[test]
    fn test_reachability() {
        let m = machine("@startuml\n[*] --> A\nA --> B : go\nC --> B : lost\n@enduml\n");
        let reach = m.reachable();
        assert!(reach.contains(&m.node_by_name("A").unwrap()));
        assert!(reach.contains(&m.node_by_name("B").unwrap()));
        assert!(!reach.contains(&m.node_by_name("C").unwrap()));
    }

    #[test]
    fn test_simple_cycles_motor() {
        let m = machine(MOTOR);
        let cycles = m.simple_cycles(m.state_count());
        // Idle -> Starting -> Stopping -> Idle and
        // Idle -> Starting -> Spinning -> Stopping -> Idle
        assert_eq!(cycles.len(), 2);
        let lens: Vec<_> = cycles.iter().map(Vec::len).collect();
        assert!(lens.contains(&3));
        assert!(lens.contains(&4));
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let m = machine(
            "@startuml\n[*] --> Pocket\nPocket --> Pocket : [ q < 10 ] / q++\n\
             Pocket --> Rich : [ q >= 10 ]\n@enduml\n",
        );
        let cycles = m.simple_cycles(m.state_count());
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 1);
    }

    #[test]
    fn test_paths_to_sinks() {
        let m = machine(
            "@startuml\n[*] --> Pocket\nPocket --> Pocket : [ q < 10 ] / q++\n\
             Pocket --> Rich : [ q >= 10 ]\n@enduml\n",
        );
        let paths = m.paths_to_sinks(2 * m.state_count());
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].len(), 2); // [*] -> Pocket -> Rich
    }

    #[test]
    fn test_slots_bound_to_machine() {
        let m = machine(
            "@startuml\n'[param] uint32_t quarters = 0\n'[init] quarters = 0;\n\
             [*] --> A\n@enduml\n",
        );
        assert_eq!(m.extra.params, vec!["uint32_t quarters = 0"]);
        assert_eq!(m.extra.init, vec!["quarters = 0;"]);
    }
}
