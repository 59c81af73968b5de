//! Structural verifier.
//!
//! Runs after the graph is frozen and before anything is synthesized or
//! emitted. All findings go through the diagnostics sink; the caller aborts
//! when any error was reported. Guard bodies are opaque and never inspected,
//! so nothing here proves mutual exclusion — rule 5 only rejects the cases
//! that are wrong for every guard valuation.

use std::collections::BTreeMap;

use crate::diag::Diagnostics;
use crate::machine::{Machine, StateKind};

/// Identifier syntax shared by C-family backends: the verifier warns early
/// so the finding carries a source position; the backend escapes later.
#[must_use]
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Run every structural rule against the machine.
pub fn verify(m: &Machine, file: &str, diags: &mut Diagnostics) {
    check_initial(m, file, diags);
    check_reachability(m, file, diags);
    check_sinks(m, file, diags);
    check_completion_cycles(m, file, diags);
    check_determinism(m, file, diags);
    check_always_taken(m, file, diags);
    check_identifiers(m, file, diags);
    check_has_events(m, file, diags);
}

fn check_initial(m: &Machine, file: &str, diags: &mut Diagnostics) {
    let Some(initial) = m.initial else {
        diags.error(file, 1, 1, "missing initial state declaration ([*] --> State)");
        return;
    };
    if m.outgoing(initial).is_empty() {
        diags.error(
            file,
            m.state(initial).line,
            1,
            "the initial pseudo-state has no outgoing transition",
        );
    }
    for e in m.incoming(initial) {
        diags.error(
            file,
            m.transition(e).line,
            1,
            "the initial pseudo-state must not have incoming transitions",
        );
    }
    for e in m.outgoing(initial) {
        let tr = m.transition(e);
        if !tr.is_completion() {
            diags.error(
                file,
                tr.line,
                1,
                format!(
                    "transition from the initial pseudo-state must not carry \
                     an event (found '{}')",
                    tr.event_name()
                ),
            );
        }
    }
}

fn check_reachability(m: &Machine, file: &str, diags: &mut Diagnostics) {
    if m.initial.is_none() {
        return;
    }
    let reachable = m.reachable();
    for n in m.states() {
        if !reachable.contains(&n) {
            diags.error(
                file,
                m.state(n).line,
                1,
                format!(
                    "state '{}' is unreachable from the initial state",
                    m.state(n).name()
                ),
            );
        }
    }
}

fn check_sinks(m: &Machine, file: &str, diags: &mut Diagnostics) {
    for n in m.normal_states() {
        let out = m.outgoing(n);
        let non_self: Vec<_> = out
            .iter()
            .filter(|&&e| m.endpoints(e).1 != n)
            .collect();
        let state = m.state(n);
        if non_self.is_empty() {
            diags.warning(
                file,
                state.line,
                1,
                format!(
                    "state '{}' has no outgoing transition; the machine \
                     deadlocks once it is reached",
                    state.name()
                ),
            );
        } else if out.iter().all(|&e| m.transition(e).guard.is_some()) {
            diags.warning(
                file,
                state.line,
                1,
                format!(
                    "every transition leaving state '{}' is guarded; the \
                     machine may deadlock if all guards reject",
                    state.name()
                ),
            );
        }
    }
}

fn check_completion_cycles(m: &Machine, file: &str, diags: &mut Diagnostics) {
    for cycle in m.simple_cycles(m.state_count()) {
        if !cycle.iter().all(|&e| m.transition(e).is_completion()) {
            continue;
        }
        let any_guard = cycle.iter().any(|&e| m.transition(e).guard.is_some());
        let route = cycle_route(m, &cycle);
        let line = m.transition(cycle[0]).line;
        if any_guard {
            diags.warning(
                file,
                line,
                1,
                format!(
                    "cycle of guarded completion transitions ({route}) may \
                     loop forever depending on the guards"
                ),
            );
        } else {
            diags.error(
                file,
                line,
                1,
                format!(
                    "infinite loop: cycle of unguarded completion \
                     transitions ({route}); add an event or a guard"
                ),
            );
        }
    }
}

fn cycle_route(m: &Machine, cycle: &[petgraph::graph::EdgeIndex]) -> String {
    let mut route = String::new();
    let (start, _) = m.endpoints(cycle[0]);
    route.push_str(m.state(start).name());
    for &e in cycle {
        route.push_str(" -> ");
        route.push_str(m.state(m.endpoints(e).1).name());
    }
    route
}

fn check_determinism(m: &Machine, file: &str, diags: &mut Diagnostics) {
    for n in m.states() {
        let mut groups: BTreeMap<&str, Vec<_>> = BTreeMap::new();
        for e in m.outgoing(n) {
            groups.entry(m.transition(e).event_name()).or_default().push(e);
        }
        for (event, edges) in groups {
            if edges.len() < 2 {
                continue;
            }
            let unguarded = edges
                .iter()
                .filter(|&&e| m.transition(e).guard.is_none())
                .count();
            if unguarded >= 2 {
                let what = if event.is_empty() {
                    "completion".to_string()
                } else {
                    format!("event '{event}'")
                };
                diags.error(
                    file,
                    m.transition(edges[0]).line,
                    1,
                    format!(
                        "state '{}' has {unguarded} unguarded transitions for \
                         {what}; at most one may be unguarded",
                        m.state(n).name()
                    ),
                );
            }
        }
    }
}

/// An unguarded completion transition is always taken when its state is
/// entered. Competing transitions declared after it (or event transitions,
/// which need the machine to rest in the state) can never fire. A trailing
/// unguarded completion after guarded ones is the legitimate default-branch
/// pattern and stays silent.
fn check_always_taken(m: &Machine, file: &str, diags: &mut Diagnostics) {
    for n in m.states() {
        let out = m.outgoing(n);
        if out.len() < 2 {
            continue;
        }
        let completions: Vec<_> = out
            .iter()
            .copied()
            .filter(|&e| m.transition(e).is_completion())
            .collect();
        let has_eventful = out.len() > completions.len();
        for (i, &e) in completions.iter().enumerate() {
            let tr = m.transition(e);
            if tr.guard.is_none() && (i + 1 < completions.len() || has_eventful) {
                diags.warning(
                    file,
                    tr.line,
                    1,
                    format!(
                        "the unguarded completion transition from '{}' to '{}' \
                         is always taken; other transitions leaving '{}' may \
                         never fire",
                        m.state(n).name(),
                        m.state(m.endpoints(e).1).name(),
                        m.state(n).name()
                    ),
                );
            }
        }
    }
}

fn check_identifiers(m: &Machine, file: &str, diags: &mut Diagnostics) {
    for n in m.states() {
        let state = m.state(n);
        if state.kind == StateKind::Initial || state.kind == StateKind::Final {
            continue;
        }
        if !is_identifier(state.name()) {
            diags.warning(
                file,
                state.line,
                1,
                format!(
                    "state name '{}' is not a valid identifier and will be \
                     escaped in the generated code",
                    state.name()
                ),
            );
        }
    }
    for (name, edges) in m.events() {
        if !is_identifier(&name) {
            diags.warning(
                file,
                m.transition(edges[0]).line,
                1,
                format!(
                    "event name '{name}' is not a valid identifier and will \
                     be escaped in the generated code"
                ),
            );
        }
    }
}

fn check_has_events(m: &Machine, file: &str, diags: &mut Diagnostics) {
    if m.transition_count() > 0 && m.events().is_empty() {
        diags.warning(file, 1, 1, "the state machine has no events");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Severity;
    use crate::machine;
    use crate::parser;

    fn run(text: &str) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let decls = parser::parse("test.plantuml", text, &mut diags).unwrap();
        let m = machine::build("Test", &decls, "test.plantuml").unwrap();
        verify(&m, "test.plantuml", &mut diags);
        diags
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("NoQuarter"));
        assert!(is_identifier("_state2"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("hors d'oeuvre"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_motor_is_clean() {
        let diags = run(
            "@startuml\n[*] --> Idle\nIdle --> Starting : setSpeed\n\
             Starting --> Spinning : setSpeed\nStarting --> Stopping : halt\n\
             Spinning --> Stopping : halt\nStopping --> Idle\n@enduml\n",
        );
        assert!(!diags.has_errors());
        assert_eq!(diags.warning_count(), 0);
    }

    #[test]
    fn test_missing_initial_state() {
        let diags = run("@startuml\nA --> B : go\nB --> A : back\n@enduml\n");
        assert!(diags.has_errors());
        assert!(diags.iter().any(|d| d.message.contains("missing initial state")));
    }

    #[test]
    fn test_unreachable_state() {
        let diags = run("@startuml\n[*] --> A\nA --> B : go\nC --> B : lost\n@enduml\n");
        assert!(diags
            .iter()
            .any(|d| d.severity == Severity::Error && d.message.contains("'C' is unreachable")));
    }

    #[test]
    fn test_sink_is_a_warning() {
        let diags = run("@startuml\n[*] --> A\nA --> B : go\n@enduml\n");
        assert!(!diags.has_errors());
        assert!(diags
            .iter()
            .any(|d| d.severity == Severity::Warning && d.message.contains("deadlocks")));
    }

    #[test]
    fn test_unguarded_completion_cycle_is_an_error() {
        let diags = run("@startuml\n[*] --> A\nA --> B\nB --> A\n@enduml\n");
        assert!(diags
            .iter()
            .any(|d| d.severity == Severity::Error && d.message.contains("infinite loop")));
    }

    #[test]
    fn test_guarded_completion_cycle_is_a_warning() {
        let diags = run(
            "@startuml\n[*] --> A\nA --> B : [ x ]\nB --> A : [ y ]\n@enduml\n",
        );
        assert!(!diags.has_errors());
        assert!(diags
            .iter()
            .any(|d| d.message.contains("may loop forever")));
    }

    #[test]
    fn test_bad_switch_two_unguarded_completions() {
        let diags = run("@startuml\n[*] --> A\nA --> B\nA --> C\nB --> A : back\nC --> A : back\n@enduml\n");
        assert!(diags.iter().any(|d| {
            d.severity == Severity::Error && d.message.contains("unguarded transitions")
        }));
    }

    #[test]
    fn test_event_from_initial_rejected() {
        let diags = run("@startuml\n[*] --> A : boot\nA --> A : tick\n@enduml\n");
        assert!(diags
            .iter()
            .any(|d| d.severity == Severity::Error && d.message.contains("must not carry")));
    }

    #[test]
    fn test_all_guarded_outgoing_warns() {
        let diags = run(
            "@startuml\n[*] --> Pocket\nPocket --> Pocket : [ q < 10 ] / q++\n\
             Pocket --> Rich : [ q >= 10 ]\n@enduml\n",
        );
        assert!(!diags.has_errors());
        assert!(diags
            .iter()
            .any(|d| d.message.contains("may deadlock if all guards reject")));
    }

    #[test]
    fn test_gumball_verifies() {
        let diags = run(
            "@startuml\n\
             [*] --> NoQuarter : [ gumballs > 0 ]\n\
             [*] --> OutOfGumballs : [ gumballs == 0 ]\n\
             NoQuarter --> HasQuarter : insertQuarter\n\
             HasQuarter --> GumballSold : turnCrank / --gumballs\n\
             GumballSold --> NoQuarter : [ gumballs > 0 ]\n\
             GumballSold --> OutOfGumballs : [ gumballs == 0 ]\n\
             @enduml\n",
        );
        assert!(!diags.has_errors());
    }

    #[test]
    fn test_always_taken_completion_warns() {
        let diags = run(
            "@startuml\n[*] --> A\nA --> B\nA --> C : go\nB --> A : back\nC --> A : back\n@enduml\n",
        );
        assert!(diags
            .iter()
            .any(|d| d.message.contains("always taken")));
    }

    #[test]
    fn test_trailing_default_completion_stays_silent() {
        let diags = run(
            "@startuml\n[*] --> A : [ ready ]\n[*] --> B\nA --> B : go\nB --> A : back\n@enduml\n",
        );
        assert!(!diags.has_errors());
        assert!(!diags.iter().any(|d| d.message.contains("always taken")));
    }

    #[test]
    fn test_non_identifier_state_name_warns() {
        let diags = run("@startuml\n[*] --> Etat-1\nEtat-1 --> Etat-1 : tick\n@enduml\n");
        assert!(!diags.has_errors());
        assert!(diags.iter().any(|d| d.message.contains("will be escaped")));
    }
}
