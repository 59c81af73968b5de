//! Test-scenario synthesizer.
//!
//! Walks the verified graph and enumerates a bounded, deterministic suite:
//! the reset scenario, one scenario per simple cycle that starts at a reset
//! destination, and one per simple path from the initial pseudo-state to a
//! sink. Each scenario fixes a truth value for every guard (walked edges
//! pass, competing edges reject) and carries the expected invocation counts
//! for transition actions and state entry/exit hooks, which the emitted test
//! asserts through stub hooks.
//!
//! The synthesizer only reads the machine; all ordering is derived from
//! declaration order and sorted keys so two runs over the same input produce
//! identical suites.

use petgraph::graph::{EdgeIndex, NodeIndex};

use crate::machine::Machine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    /// Reset only; asserts membership in the set of initial destinations.
    InitialState,
    Cycle,
    Path,
}

/// One replay step of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Invoke the event operation of this edge.
    Fire(EdgeIndex),
    /// Assert the machine sits in this state (it is quiescent here).
    Expect(NodeIndex),
}

#[derive(Debug)]
pub struct Scenario {
    pub kind: ScenarioKind,
    /// Human-readable route, e.g. `[*] -> NoQuarter -> HasQuarter`.
    pub title: String,
    /// Edge walk starting with an initial-pseudo-state edge; empty for the
    /// reset scenario.
    pub walk: Vec<EdgeIndex>,
    pub steps: Vec<Step>,
    /// Expected terminal state; `None` for the reset scenario.
    pub terminal: Option<NodeIndex>,
    /// Possible reset destinations (reset scenario only).
    pub initial_candidates: Vec<NodeIndex>,
    /// Truth value for every guarded edge of the machine, declaration order.
    pub guard_values: Vec<(EdgeIndex, bool)>,
    /// Expected invocation count for every actioned edge, declaration order.
    pub action_counts: Vec<(EdgeIndex, u32)>,
    /// Expected invocation count for every state owning an entry action.
    pub entry_counts: Vec<(NodeIndex, u32)>,
    /// Expected invocation count for every state owning an exit action.
    pub exit_counts: Vec<(NodeIndex, u32)>,
}

/// Enumerate the suite for a verified machine.
#[must_use]
pub fn synthesize(m: &Machine) -> Vec<Scenario> {
    let Some(initial) = m.initial else {
        return Vec::new();
    };
    let mut scenarios = vec![initial_scenario(m, initial)];

    let c_max = m.state_count();
    let l_max = 2 * m.state_count();

    let mut cycles = Vec::new();
    for cycle in m.simple_cycles(c_max) {
        if let Some(walk) = cycle_walk(m, initial, &cycle) {
            if replayable_cycle(m, &walk) && feasible(m, &walk) {
                cycles.push(walk);
            } else {
                tracing::debug!("skipping unreplayable cycle {}", route(m, &cycle));
            }
        } else {
            tracing::debug!(
                "skipping cycle {} (no entry among the reset destinations)",
                route(m, &cycle)
            );
        }
    }
    sort_walks(m, &mut cycles);
    scenarios.extend(
        cycles
            .into_iter()
            .map(|walk| walk_scenario(m, ScenarioKind::Cycle, walk)),
    );

    let mut paths: Vec<_> = m
        .paths_to_sinks(l_max)
        .into_iter()
        .filter(|walk| feasible(m, walk))
        .collect();
    sort_walks(m, &mut paths);
    scenarios.extend(
        paths
            .into_iter()
            .map(|walk| walk_scenario(m, ScenarioKind::Path, walk)),
    );

    tracing::debug!("synthesized {} scenario(s)", scenarios.len());
    scenarios
}

fn initial_scenario(m: &Machine, initial: NodeIndex) -> Scenario {
    let mut candidates = Vec::new();
    for e in m.outgoing(initial) {
        let (_, tgt) = m.endpoints(e);
        if !candidates.contains(&tgt) {
            candidates.push(tgt);
        }
    }
    Scenario {
        kind: ScenarioKind::InitialState,
        title: "initial state after reset".to_string(),
        walk: Vec::new(),
        steps: Vec::new(),
        terminal: None,
        initial_candidates: candidates,
        guard_values: Vec::new(),
        action_counts: Vec::new(),
        entry_counts: Vec::new(),
        exit_counts: Vec::new(),
    }
}

/// Rotate a cycle so it starts at a reset destination and prefix it with the
/// matching initial edge. `None` when the cycle touches no reset destination
/// (the replay could never reach its entry from a fresh machine).
fn cycle_walk(m: &Machine, initial: NodeIndex, cycle: &[EdgeIndex]) -> Option<Vec<EdgeIndex>> {
    let reset_edges = m.outgoing(initial);
    let rotation = cycle.iter().position(|&e| {
        let (src, _) = m.endpoints(e);
        reset_edges.iter().any(|&r| m.endpoints(r).1 == src)
    })?;
    let entry = m.endpoints(cycle[rotation]).0;
    let init_edge = reset_edges
        .iter()
        .copied()
        .find(|&r| m.endpoints(r).1 == entry)?;

    let mut walk = Vec::with_capacity(cycle.len() + 1);
    walk.push(init_edge);
    walk.extend_from_slice(&cycle[rotation..]);
    walk.extend_from_slice(&cycle[..rotation]);
    Some(walk)
}

/// Replaying a cycle ends by re-entering its entry vertex, which re-runs the
/// entry vertex's completion dispatch. The replay therefore only quiesces at
/// the entry when the first in-cycle edge needs an event; the one exception
/// is a pure self-loop, which fires once and stays put.
fn replayable_cycle(m: &Machine, walk: &[EdgeIndex]) -> bool {
    let cycle = &walk[1..];
    if cycle.len() == 1 {
        let (src, dst) = m.endpoints(cycle[0]);
        if src == dst {
            return true;
        }
    }
    cycle
        .first()
        .is_some_and(|&e| !m.transition(e).is_completion())
}

/// States where the replay must quiesce: after reset, before each event,
/// and at the end of the walk.
fn pause_states(m: &Machine, walk: &[EdgeIndex]) -> Vec<NodeIndex> {
    let mut states = Vec::new();
    let mut push = |n: NodeIndex| {
        if !states.contains(&n) {
            states.push(n);
        }
    };
    let eventful: Vec<EdgeIndex> = walk
        .iter()
        .copied()
        .filter(|&e| !m.transition(e).is_completion())
        .collect();
    if let Some(&last) = walk.last() {
        push(m.endpoints(last).1);
    }
    for &e in &eventful {
        push(m.endpoints(e).0);
    }
    states
}

/// A walk is replayable only if the driver's first-match dispatch actually
/// selects each walked edge (an earlier unguarded completion edge, or an
/// earlier row for the same event, shadows it), and only if no pause state
/// carries an unguarded completion edge that would drag the machine onward.
fn feasible(m: &Machine, walk: &[EdgeIndex]) -> bool {
    for &e in walk {
        let (src, _) = m.endpoints(e);
        let tr = m.transition(e);
        for f in m.outgoing(src) {
            if f == e {
                break;
            }
            let other = m.transition(f);
            if tr.is_completion() {
                if other.is_completion() && other.guard.is_none() {
                    return false;
                }
            } else if other.event_name() == tr.event_name() {
                return false;
            }
        }
    }
    for n in pause_states(m, walk) {
        for e in m.outgoing(n) {
            let tr = m.transition(e);
            if tr.is_completion() && tr.guard.is_none() {
                return false;
            }
        }
    }
    true
}

/// Sort key per spec: ascending length, then the lexicographic event-name
/// sequence.
fn sort_walks(m: &Machine, walks: &mut [Vec<EdgeIndex>]) {
    walks.sort_by_key(|walk| (walk.len(), event_names(m, walk)));
}

fn event_names(m: &Machine, walk: &[EdgeIndex]) -> Vec<String> {
    walk.iter()
        .filter_map(|&e| m.transition(e).event.as_ref().map(|ev| ev.name.clone()))
        .collect()
}

fn route(m: &Machine, walk: &[EdgeIndex]) -> String {
    let mut s = String::new();
    if let Some(&first) = walk.first() {
        s.push_str(m.state(m.endpoints(first).0).name());
        for &e in walk {
            s.push_str(" -> ");
            s.push_str(m.state(m.endpoints(e).1).name());
        }
    }
    s
}

fn walk_scenario(m: &Machine, kind: ScenarioKind, walk: Vec<EdgeIndex>) -> Scenario {
    let prefix = match kind {
        ScenarioKind::Cycle => "cycle",
        ScenarioKind::Path => "path",
        ScenarioKind::InitialState => "reset",
    };
    let title = format!("{prefix}: {}", route(m, &walk));
    let terminal = m.endpoints(*walk.last().expect("empty walk")).1;

    // Guard truth assignment: walked guards pass, every other guard rejects.
    let guard_values: Vec<_> = m
        .transitions()
        .filter(|&e| m.transition(e).guard.is_some())
        .map(|e| (e, walk.contains(&e)))
        .collect();

    let action_counts: Vec<_> = m
        .transitions()
        .filter(|&e| m.transition(e).action.is_some())
        .map(|e| (e, walk.iter().filter(|&&w| w == e).count() as u32))
        .collect();

    // Entry/exit fire only when the driver actually changes state.
    let hop_count = |n: NodeIndex, entering: bool| -> u32 {
        walk.iter()
            .filter(|&&e| {
                let (src, tgt) = m.endpoints(e);
                src != tgt && (if entering { tgt == n } else { src == n })
            })
            .count() as u32
    };
    let entry_counts: Vec<_> = m
        .normal_states()
        .filter(|&n| !m.state(n).entry.is_empty())
        .map(|n| (n, hop_count(n, true)))
        .collect();
    let exit_counts: Vec<_> = m
        .normal_states()
        .filter(|&n| !m.state(n).exit.is_empty())
        .map(|n| (n, hop_count(n, false)))
        .collect();

    // Replay: the machine quiesces right before each eventful edge and at
    // the end of the walk; those are the only observable points.
    let eventful: Vec<usize> = walk
        .iter()
        .enumerate()
        .filter(|(_, &e)| !m.transition(e).is_completion())
        .map(|(i, _)| i)
        .collect();
    let mut steps = Vec::new();
    let post_reset = match eventful.first() {
        Some(&i) => m.endpoints(walk[i]).0,
        None => terminal,
    };
    steps.push(Step::Expect(post_reset));
    for (pos, &i) in eventful.iter().enumerate() {
        steps.push(Step::Fire(walk[i]));
        let stable = match eventful.get(pos + 1) {
            Some(&j) => m.endpoints(walk[j]).0,
            None => terminal,
        };
        steps.push(Step::Expect(stable));
    }

    Scenario {
        kind,
        title,
        walk,
        steps,
        terminal: Some(terminal),
        initial_candidates: Vec::new(),
        guard_values,
        action_counts,
        entry_counts,
        exit_counts,
    }
}
