//! C++ code-generation backend.
//!
//! Emits one self-contained artifact holding the driver, the state
//! enumeration, a `stringify` mapping back to the verbatim source names, and
//! the machine class, plus one test artifact replaying the synthesized
//! scenarios against stub hooks. Artifacts target C++14; `MOCKABLE` expands
//! to nothing in production builds and to `virtual` in the test translation
//! unit.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::graph::{EdgeIndex, NodeIndex};

use super::backend::{CodegenBackend, OutputKind};
use crate::error::{ScError, ScResult};
use crate::machine::{Machine, StateKind};
use crate::scenario::{Scenario, ScenarioKind, Step};
use crate::verify::is_identifier;

pub struct CppBackend;

const BACKEND_NAME: &str = "cpp";

/// Names the backend refuses to escape: the reserved enumerants and the
/// fixed members of the generated class.
const RESERVED: &[&str] = &[
    "IGNORING_EVENT",
    "CANNOT_HAPPEN",
    "MAX_STATES",
    "INITIAL_STATE",
    "FINAL_STATE",
    "reset",
    "state",
    "c_str",
    "transition",
];

const CPP_KEYWORDS: &[&str] = &[
    "alignas", "alignof", "auto", "bool", "break", "case", "catch", "char", "class", "const",
    "constexpr", "continue", "default", "delete", "do", "double", "else", "enum", "explicit",
    "extern", "false", "float", "for", "friend", "goto", "if", "inline", "int", "long",
    "mutable", "namespace", "new", "noexcept", "nullptr", "operator", "private", "protected",
    "public", "return", "short", "signed", "sizeof", "static", "struct", "switch", "template",
    "this", "throw", "true", "try", "typedef", "typename", "union", "unsigned", "using",
    "virtual", "void", "volatile", "while",
];

/// Driver base class, emitted verbatim above every generated machine so the
/// artifact stands alone. Completion transitions raised from inside
/// entry/exit/action bodies are serialized through a 16-deep FIFO queue;
/// overflowing it is treated as an infinite loop.
const DRIVER_PREAMBLE: &str = r##"#include <array>
#include <cstdio>
#include <map>
#include <queue>
#include <stdlib.h>
#include <utility>

#if defined(FSM_DEBUG)
#  define LOGD printf
#else
#  define LOGD(...)
#endif

#if !defined(MOCKABLE)
#  define MOCKABLE
#endif

#if defined(FSM_THREAD_SAFE)
#  include <mutex>
#endif

//! \brief Return the given state as a raw string (shall not be freed).
template<class STATES_ID>
const char* stringify(STATES_ID state);

// ****************************************************************************
//! \brief Base class running a flat finite state machine. States hold
//! optional entry/exit actions (Moore); each external event of the derived
//! class holds a sparse table mapping the current state to a transition
//! record with an optional guard and action (Mealy). Hierarchical, composite
//! and concurrent charts are out of scope.
// ****************************************************************************
template<typename FSM, class STATES_ID>
class StateMachine
{
public:

    //! \brief Pointer to a guard member function.
    using bFuncPtr = bool (FSM::*)();
    //! \brief Pointer to an action member function.
    using xFuncPtr = void (FSM::*)();

    //! \brief Optional reactions a state performs.
    struct State
    {
        xFuncPtr entering = nullptr;
        xFuncPtr leaving = nullptr;
    };

    //! \brief Where an event sends the machine.
    struct Transition
    {
        STATES_ID destination = STATES_ID::IGNORING_EVENT;
        bFuncPtr guard = nullptr;
        xFuncPtr action = nullptr;
    };

    //! \brief Table of states indexed by the state enumeration.
    using States = std::array<State, STATES_ID::MAX_STATES>;
    //! \brief Sparse per-event transition table.
    using Transitions = std::map<STATES_ID, Transition>;

    explicit StateMachine(STATES_ID initial)
        : m_current_state(initial), m_initial_state(initial)
    {}

    //! \brief Current state.
    STATES_ID state() const { return m_current_state; }

    //! \brief Current state as a human readable string.
    const char* c_str() const { return stringify(m_current_state); }

protected:

    //! \brief Restore the initial state and drop pending transitions.
    void restoreInitial()
    {
        m_current_state = m_initial_state;
        std::queue<Transition const*> empty;
        std::swap(m_nesting, empty);
    }

    //! \brief Dispatch an external event: states without a row in the table
    //! ignore the event.
    void transition(Transitions const& transitions)
    {
        typename Transitions::const_iterator it = transitions.find(m_current_state);
        if (it != transitions.end())
        {
            transition(&it->second);
        }
        else
        {
            LOGD("[FSM] Ignoring event in state %s\n", c_str());
        }
    }

    //! \brief Apply a transition record, then drain queued completions in
    //! FIFO order. The queue is empty again when this returns.
    void transition(Transition const* record)
    {
#if defined(FSM_THREAD_SAFE)
        std::lock_guard<std::recursive_mutex> lock(m_mutex);
#endif
        // Re-entrant call from inside an entry/exit/action body: enqueue and
        // let the outer drain loop consume it.
        if (!m_nesting.empty())
        {
            m_nesting.push(record);
            if (m_nesting.size() >= 16u)
            {
                fprintf(stderr, "[FSM] Infinite loop detected. Aborting!\n");
                exit(EXIT_FAILURE);
            }
            return;
        }

        m_nesting.push(record);
        while (!m_nesting.empty())
        {
            Transition const* tr = m_nesting.front();

            if (tr->destination == STATES_ID::CANNOT_HAPPEN)
            {
                fprintf(stderr, "[FSM] Forbidden event. Aborting!\n");
                exit(EXIT_FAILURE);
            }
            if (tr->destination >= STATES_ID::MAX_STATES)
            {
                fprintf(stderr, "[FSM] Unknown state. Aborting!\n");
                exit(EXIT_FAILURE);
            }
            if (tr->destination == STATES_ID::IGNORING_EVENT)
            {
                LOGD("[FSM] Ignoring event\n");
                m_nesting.pop();
                continue;
            }

            bool allowed = (tr->guard == nullptr);
            if (!allowed)
            {
                allowed = (static_cast<FSM*>(this)->*tr->guard)();
                LOGD("[FSM] Guard %s -> %s: %s\n", c_str(),
                     stringify(tr->destination), allowed ? "passed" : "rejected");
            }

            if (allowed)
            {
                STATES_ID previous = m_current_state;
                m_current_state = tr->destination;
                State const& source = m_states[previous];
                State const& destination = m_states[tr->destination];

                if (tr->action != nullptr)
                {
                    (static_cast<FSM*>(this)->*tr->action)();
                }
                // Internal and self transitions re-run nothing.
                if (previous != tr->destination)
                {
                    if (source.leaving != nullptr)
                    {
                        (static_cast<FSM*>(this)->*source.leaving)();
                    }
                    if (destination.entering != nullptr)
                    {
                        (static_cast<FSM*>(this)->*destination.entering)();
                    }
                }
            }
            else
            {
                LOGD("[FSM] Transition refused by its guard. Staying in %s\n", c_str());
            }

            m_nesting.pop();
        }
    }

    //! \brief Table of state reactions, filled by the derived constructor.
    States m_states;
    //! \brief Current active state.
    STATES_ID m_current_state;

private:

    STATES_ID m_initial_state;
    //! \brief Pending completion transitions (see transition()).
    std::queue<Transition const*> m_nesting;
#if defined(FSM_THREAD_SAFE)
    std::recursive_mutex m_mutex;
#endif
};
"##;

impl CodegenBackend for CppBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn output_kind(&self, selector: &str) -> Option<OutputKind> {
        match selector {
            "cpp" => Some(OutputKind::Source),
            "hpp" => Some(OutputKind::Header),
            _ => None,
        }
    }

    fn machine_file_name(&self, machine: &str, kind: OutputKind) -> String {
        match kind {
            OutputKind::Source => format!("{machine}.cpp"),
            OutputKind::Header => format!("{machine}.hpp"),
        }
    }

    fn test_file_name(&self, machine: &str) -> String {
        format!("{machine}Tests.cpp")
    }

    fn escape_ident(&self, raw: &str) -> ScResult<String> {
        if RESERVED.contains(&raw) || CPP_KEYWORDS.contains(&raw) {
            return Err(ScError::Emit {
                backend: BACKEND_NAME,
                message: format!("'{raw}' collides with a reserved identifier"),
            });
        }
        if is_identifier(raw) {
            return Ok(raw.to_string());
        }
        let mut out = String::new();
        for (i, ch) in raw.chars().enumerate() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                if i == 0 && ch.is_ascii_digit() {
                    out.push('_');
                }
                out.push(ch);
            } else {
                let mut buf = [0u8; 4];
                for byte in ch.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("_x{byte:02x}"));
                }
            }
        }
        Ok(out)
    }

    fn string_literal(&self, raw: &str) -> String {
        let escaped = raw.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    }

    fn render_machine(
        &self,
        machine: &Machine,
        kind: OutputKind,
        warnings: &[String],
    ) -> ScResult<String> {
        Renderer::new(self, machine)?.machine_artifact(kind, warnings)
    }

    fn render_tests(
        &self,
        machine: &Machine,
        scenarios: &[Scenario],
        kind: OutputKind,
    ) -> ScResult<String> {
        Renderer::new(self, machine)?.test_artifact(scenarios, kind)
    }
}

/// Precomputed, collision-checked names for one machine.
struct Renderer<'a> {
    backend: &'a CppBackend,
    m: &'a Machine,
    class_name: String,
    enum_name: String,
    upper: String,
    /// node index -> enumerant
    enum_idents: BTreeMap<usize, String>,
    /// node index -> tag used inside hook method names
    tags: BTreeMap<usize, String>,
    /// edge index -> `Src_Dst[_Event]` hook suffix
    suffixes: BTreeMap<usize, String>,
    /// event name -> escaped method name
    event_methods: BTreeMap<String, String>,
    out: String,
}

impl<'a> Renderer<'a> {
    fn new(backend: &'a CppBackend, m: &'a Machine) -> ScResult<Self> {
        let class_name = m.name.clone();
        let enum_name = format!("{class_name}States");
        let upper = class_name.to_uppercase();

        let mut enum_idents = BTreeMap::new();
        let mut tags = BTreeMap::new();
        let mut enum_scope = BTreeSet::new();
        for n in m.states() {
            let state = m.state(n);
            let (ident, tag) = match &state.kind {
                StateKind::Initial => ("INITIAL_STATE".to_string(), "Start".to_string()),
                StateKind::Final => ("FINAL_STATE".to_string(), "Final".to_string()),
                StateKind::Normal(name) => {
                    let escaped = backend.escape_ident(name)?;
                    (escaped.clone(), escaped)
                }
            };
            if !enum_scope.insert(ident.clone()) {
                return Err(collision(&ident));
            }
            enum_idents.insert(n.index(), ident);
            tags.insert(n.index(), tag);
        }

        let mut member_scope: BTreeSet<String> =
            ["reset", "state", "c_str", "transition", "restoreInitial", "onStart_"]
                .iter()
                .map(|s| (*s).to_string())
                .collect();

        let mut suffixes = BTreeMap::new();
        for e in m.transitions() {
            let (src, dst) = m.endpoints(e);
            let tr = m.transition(e);
            let mut suffix = format!("{}_{}", tags[&src.index()], tags[&dst.index()]);
            if let Some(event) = &tr.event {
                suffix.push('_');
                suffix.push_str(&backend.escape_ident(&event.name)?);
            }
            if tr.guard.is_some() && !member_scope.insert(format!("onGuarding_{suffix}")) {
                return Err(collision(&format!("onGuarding_{suffix}")));
            }
            if tr.action.is_some() && !member_scope.insert(format!("onTransitioning_{suffix}")) {
                return Err(collision(&format!("onTransitioning_{suffix}")));
            }
            suffixes.insert(e.index(), suffix);
        }

        for n in m.normal_states() {
            let tag = &tags[&n.index()];
            let state = m.state(n);
            if !state.entry.is_empty() && !member_scope.insert(format!("onEntering_{tag}")) {
                return Err(collision(&format!("onEntering_{tag}")));
            }
            if !state.exit.is_empty() && !member_scope.insert(format!("onLeaving_{tag}")) {
                return Err(collision(&format!("onLeaving_{tag}")));
            }
        }

        let mut event_methods = BTreeMap::new();
        for name in m.events().keys() {
            let escaped = backend.escape_ident(name)?;
            if !member_scope.insert(escaped.clone()) {
                return Err(collision(&escaped));
            }
            event_methods.insert(name.clone(), escaped);
        }

        Ok(Self {
            backend,
            m,
            class_name,
            enum_name,
            upper,
            enum_idents,
            tags,
            suffixes,
            event_methods,
            out: String::new(),
        })
    }

    fn line(&mut self, s: impl AsRef<str>) {
        self.out.push_str(s.as_ref());
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn enum_ref(&self, n: NodeIndex) -> String {
        format!("{}::{}", self.enum_name, self.enum_idents[&n.index()])
    }

    fn tag(&self, n: NodeIndex) -> &str {
        &self.tags[&n.index()]
    }

    fn suffix(&self, e: EdgeIndex) -> &str {
        &self.suffixes[&e.index()]
    }

    fn guard_hook(&self, e: EdgeIndex) -> String {
        format!("onGuarding_{}", self.suffix(e))
    }

    fn action_hook(&self, e: EdgeIndex) -> String {
        format!("onTransitioning_{}", self.suffix(e))
    }

    fn state_str(&self, n: NodeIndex) -> String {
        self.backend.string_literal(self.m.state(n).name())
    }

    /// States with at least one completion edge leaving them, minus the
    /// initial pseudo-state (its dispatch lives in `onStart_`).
    fn completion_sources(&self) -> Vec<NodeIndex> {
        self.m
            .normal_states()
            .filter(|&n| {
                self.m
                    .outgoing(n)
                    .iter()
                    .any(|&e| self.m.transition(e).is_completion())
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Primary artifact
    // ------------------------------------------------------------------

    fn machine_artifact(mut self, kind: OutputKind, warnings: &[String]) -> ScResult<String> {
        self.line(format!(
            "// {} state machine generated by sc-gen. Do not edit.",
            self.class_name
        ));
        if kind == OutputKind::Header {
            self.line(format!("#ifndef {}_GENERATED_HPP", self.upper));
            self.line(format!("#  define {}_GENERATED_HPP", self.upper));
        }
        self.blank();
        self.out.push_str(DRIVER_PREAMBLE);
        self.blank();

        for extra in &self.m.extra.header.clone() {
            self.line(extra);
        }
        if !self.m.extra.header.is_empty() {
            self.blank();
        }

        for warning in warnings {
            let text = warning.replace('"', "'");
            self.line(format!("#warning \"{text}\""));
        }
        if !warnings.is_empty() {
            self.blank();
        }

        self.emit_enum();
        self.emit_stringify();
        self.emit_class();

        for extra in &self.m.extra.footer.clone() {
            self.line(extra);
        }
        if kind == OutputKind::Header {
            self.line(format!("#endif // {}_GENERATED_HPP", self.upper));
        }
        Ok(self.out)
    }

    fn emit_enum(&mut self) {
        self.separator();
        self.line(format!("//! \\brief States of the {} machine.", self.class_name));
        self.separator();
        self.line(format!("enum {}", self.enum_name));
        self.line("{");
        self.line("    // Client states:");
        let nodes: Vec<NodeIndex> = self.m.normal_states().collect();
        for n in nodes {
            let ident = self.enum_idents[&n.index()].clone();
            match self.m.state(n).comment.clone() {
                Some(comment) => self.line(format!("    {ident}, //!< {comment}")),
                None => self.line(format!("    {ident},")),
            }
        }
        self.line("    // Mandatory internal states:");
        if self.m.final_state.is_some() {
            self.line("    FINAL_STATE,");
        }
        self.line("    INITIAL_STATE, IGNORING_EVENT, CANNOT_HAPPEN, MAX_STATES");
        self.line("};");
        self.blank();
    }

    fn emit_stringify(&mut self) {
        self.separator();
        self.line("//! \\brief Convert state enumerants to human readable strings.");
        self.separator();
        self.line(format!(
            "inline const char* stringify({} state)",
            self.enum_name
        ));
        self.line("{");
        self.line("    switch (state)");
        self.line("    {");
        let nodes: Vec<NodeIndex> = self.m.normal_states().collect();
        for n in nodes {
            let case = format!(
                "        case {}: return {};",
                self.enum_ref(n),
                self.state_str(n)
            );
            self.line(case);
        }
        if self.m.final_state.is_some() {
            let label = format!("        case {}::FINAL_STATE: return \"[*]\";", self.enum_name);
            self.line(label);
        }
        self.line(format!(
            "        case {}::INITIAL_STATE: return \"[*]\";",
            self.enum_name
        ));
        self.line("        default: return \"?\";");
        self.line("    }");
        self.line("}");
        self.blank();
    }

    fn emit_class(&mut self) {
        self.separator();
        if self.m.extra.brief.is_empty() {
            self.line(format!(
                "//! \\brief {} state machine concrete implementation.",
                self.class_name
            ));
        } else {
            for brief in &self.m.extra.brief.clone() {
                self.line(format!("//! \\brief {brief}"));
            }
        }
        self.separator();
        self.line(format!(
            "class {} : public StateMachine<{}, {}>",
            self.class_name, self.class_name, self.enum_name
        ));
        self.line("{");
        self.line("public: // Constructor, reset and external events");
        self.blank();
        self.emit_constructor();
        self.emit_reset();
        self.emit_event_methods();
        self.line("private: // Guards, actions and state reactions");
        self.blank();
        self.emit_start_dispatch();
        self.emit_transition_hooks();
        self.emit_state_hooks();
        self.emit_completion_dispatch();
        for code in &self.m.extra.code.clone() {
            if code.trim_end().ends_with(':') {
                self.line(code);
            } else {
                self.line(format!("    {code}"));
            }
        }
        self.line("};");
        self.blank();
    }

    fn emit_constructor(&mut self) {
        self.method_comment("Wire the state table, then reset: the machine leaves the initial pseudo-state on construction.");
        let params = self.m.extra.params.join(", ");
        self.line(format!("    {}({})", self.class_name, params));
        let mut init = format!(
            "        : StateMachine({}::INITIAL_STATE)",
            self.enum_name
        );
        for cons in &self.m.extra.cons {
            init.push_str(", ");
            init.push_str(cons);
        }
        self.line(init);
        self.line("    {");
        let nodes: Vec<NodeIndex> = self.m.normal_states().collect();
        let completion_sources = self.completion_sources();
        for n in nodes {
            let state = self.m.state(n);
            let has_entry = !state.entry.is_empty();
            let has_completion = completion_sources.contains(&n);
            let has_exit = !state.exit.is_empty();
            let tag = self.tag(n).to_string();
            let enum_ref = self.enum_ref(n);
            if has_entry || has_completion {
                let entering = if has_entry && has_completion {
                    format!("enterState_{tag}")
                } else if has_completion {
                    format!("onCompletion_{tag}")
                } else {
                    format!("onEntering_{tag}")
                };
                self.line(format!(
                    "        m_states[{enum_ref}].entering = &{}::{entering};",
                    self.class_name
                ));
            }
            if has_exit {
                self.line(format!(
                    "        m_states[{enum_ref}].leaving = &{}::onLeaving_{tag};",
                    self.class_name
                ));
            }
        }
        self.line("        reset();");
        self.line("    }");
        self.blank();
    }

    fn emit_reset(&mut self) {
        self.method_comment(
            "Restore the initial pseudo-state, drop pending transitions and \
             take the initial completion transitions.",
        );
        self.line("    void reset()");
        self.line("    {");
        self.line("        restoreInitial();");
        for init in &self.m.extra.init.clone() {
            self.line(format!("        {}", statement(init)));
        }
        self.line("        onStart_();");
        self.line("    }");
        self.blank();
    }

    fn emit_event_methods(&mut self) {
        for (event_name, method) in self.event_methods.clone() {
            let edges = self.m.events().remove(&event_name).unwrap_or_default();
            let params = edges
                .iter()
                .find_map(|&e| {
                    self.m.transition(e).event.as_ref().and_then(|ev| ev.params.clone())
                })
                .unwrap_or_default();
            self.method_comment(&format!("External event '{event_name}'."));
            self.line(format!("    void {method}({params})"));
            self.line("    {");
            self.line(format!(
                "        LOGD(\"[{}][EVENT %s]\\n\", __func__);",
                self.upper
            ));
            self.blank();
            self.line("        static const Transitions s_transitions =");
            self.line("        {");
            for &e in &edges {
                let (src, dst) = self.m.endpoints(e);
                let tr = self.m.transition(e);
                let guard = match tr.guard {
                    Some(_) => format!("&{}::{}", self.class_name, self.guard_hook(e)),
                    None => "nullptr".to_string(),
                };
                let action = match tr.action {
                    Some(_) => format!("&{}::{}", self.class_name, self.action_hook(e)),
                    None => "nullptr".to_string(),
                };
                self.line(format!(
                    "            {{ {}, {{ {}, {guard}, {action} }} }},",
                    self.enum_ref(src),
                    self.enum_ref(dst)
                ));
            }
            self.line("        };");
            self.blank();
            self.line("        transition(s_transitions);");
            self.line("    }");
            self.blank();
        }
    }

    /// Dispatch body shared by `onStart_` and the per-state completion
    /// hooks: try each completion edge in declaration order, first passing
    /// guard wins.
    fn emit_dispatch_body(&mut self, edges: &[EdgeIndex]) {
        for &e in edges {
            let (_, dst) = self.m.endpoints(e);
            let tr = self.m.transition(e);
            let action = match tr.action {
                Some(_) => format!("&{}::{}", self.class_name, self.action_hook(e)),
                None => "nullptr".to_string(),
            };
            let record = format!(
                "            static const Transition tr = {{ {}, nullptr, {action} }};",
                self.enum_ref(dst)
            );
            if tr.guard.is_some() {
                self.line(format!("        if ({}())", self.guard_hook(e)));
                self.line("        {");
                self.line(record);
                self.line("            transition(&tr);");
                self.line("            return;");
                self.line("        }");
            } else {
                self.line("        {");
                self.line(record);
                self.line("            transition(&tr);");
                self.line("            return;");
                self.line("        }");
            }
        }
    }

    fn emit_start_dispatch(&mut self) {
        self.method_comment("Take the initial transitions (guards evaluated in declaration order).");
        self.line("    void onStart_()");
        self.line("    {");
        self.line(format!(
            "        LOGD(\"[{}] Leaving the initial pseudo-state\\n\");",
            self.upper
        ));
        if let Some(initial) = self.m.initial {
            let edges: Vec<EdgeIndex> = self
                .m
                .outgoing(initial)
                .into_iter()
                .filter(|&e| self.m.transition(e).is_completion())
                .collect();
            self.emit_dispatch_body(&edges);
        }
        self.line("    }");
        self.blank();
    }

    fn emit_transition_hooks(&mut self) {
        let edges: Vec<EdgeIndex> = self.m.transitions().collect();
        for e in edges {
            let (src, dst) = self.m.endpoints(e);
            let tr = self.m.transition(e).clone();
            let src_str = self.state_str(src);
            let dst_str = self.state_str(dst);
            if tr.guard.is_some() {
                self.method_comment(&format!(
                    "Guard of the transition {} -> {}.",
                    self.m.state(src).name(),
                    self.m.state(dst).name()
                ));
                self.line(format!("    MOCKABLE bool {}()", self.guard_hook(e)));
                self.line("    {");
                self.line(format!(
                    "        const bool guard = ({});",
                    tr.guard.as_deref().unwrap_or_default()
                ));
                self.line(format!(
                    "        LOGD(\"[{}][GUARD %s -> %s] %s\\n\", {src_str}, {dst_str}, \
                     guard ? \"passed\" : \"rejected\");",
                    self.upper
                ));
                self.line("        return guard;");
                self.line("    }");
                self.blank();
            }
            if tr.action.is_some() {
                self.method_comment(&format!(
                    "Action of the transition {} -> {}.",
                    self.m.state(src).name(),
                    self.m.state(dst).name()
                ));
                self.line(format!("    MOCKABLE void {}()", self.action_hook(e)));
                self.line("    {");
                self.line(format!(
                    "        LOGD(\"[{}][TRANSITION %s -> %s]\\n\", {src_str}, {dst_str});",
                    self.upper
                ));
                self.line(format!(
                    "        {}",
                    statement(tr.action.as_deref().unwrap_or_default())
                ));
                self.line("    }");
                self.blank();
            }
        }
    }

    fn emit_state_hooks(&mut self) {
        let nodes: Vec<NodeIndex> = self.m.normal_states().collect();
        for n in nodes {
            let state = self.m.state(n).clone();
            let tag = self.tag(n).to_string();
            let name_str = self.state_str(n);
            if !state.entry.is_empty() {
                self.method_comment(&format!("Entry action of state {}.", state.name()));
                self.line(format!("    MOCKABLE void onEntering_{tag}()"));
                self.line("    {");
                self.line(format!(
                    "        LOGD(\"[{}][ENTERING %s]\\n\", {name_str});",
                    self.upper
                ));
                for body in &state.entry {
                    self.line(format!("        {}", statement(body)));
                }
                self.line("    }");
                self.blank();
            }
            if !state.exit.is_empty() {
                self.method_comment(&format!("Exit action of state {}.", state.name()));
                self.line(format!("    MOCKABLE void onLeaving_{tag}()"));
                self.line("    {");
                self.line(format!(
                    "        LOGD(\"[{}][LEAVING %s]\\n\", {name_str});",
                    self.upper
                ));
                for body in &state.exit {
                    self.line(format!("        {}", statement(body)));
                }
                self.line("    }");
                self.blank();
            }
        }
    }

    fn emit_completion_dispatch(&mut self) {
        for n in self.completion_sources() {
            let tag = self.tag(n).to_string();
            let has_entry = !self.m.state(n).entry.is_empty();
            let edges: Vec<EdgeIndex> = self
                .m
                .outgoing(n)
                .into_iter()
                .filter(|&e| self.m.transition(e).is_completion())
                .collect();

            self.method_comment(&format!(
                "Completion transitions leaving state {}.",
                self.m.state(n).name()
            ));
            self.line(format!("    void onCompletion_{tag}()"));
            self.line("    {");
            self.emit_dispatch_body(&edges);
            self.line("    }");
            self.blank();

            if has_entry {
                // Non-virtual wrapper: stubbing the entry hook in tests must
                // not disable the completion drain.
                self.line(format!("    void enterState_{tag}()"));
                self.line("    {");
                self.line(format!("        onEntering_{tag}();"));
                self.line(format!("        onCompletion_{tag}();"));
                self.line("    }");
                self.blank();
            }
        }
    }

    // ------------------------------------------------------------------
    // Test artifact
    // ------------------------------------------------------------------

    fn test_artifact(mut self, scenarios: &[Scenario], kind: OutputKind) -> ScResult<String> {
        let include = self.backend.machine_file_name(&self.class_name, kind);
        self.line(format!(
            "// Unit tests for the {} state machine generated by sc-gen. Do not edit.",
            self.class_name
        ));
        self.separator();
        self.line("//! \\brief Compile with:");
        self.line(format!(
            "//! g++ --std=c++14 -Wall -Wextra -DFSM_DEBUG {}Tests.cpp",
            self.class_name
        ));
        self.separator();
        self.line("#define MOCKABLE virtual");
        self.line(format!("#include \"{include}\""));
        self.line("#include <cassert>");
        self.line("#include <cstdio>");
        self.line("#include <cstring>");
        self.blank();
        for test in &self.m.extra.test.clone() {
            self.line(test);
        }
        if !self.m.extra.test.is_empty() {
            self.blank();
        }

        self.emit_stub_class();
        let mut names = Vec::new();
        let mut cycle_count = 0usize;
        let mut path_count = 0usize;
        for scenario in scenarios {
            let name = match scenario.kind {
                ScenarioKind::InitialState => "test_initial_state".to_string(),
                ScenarioKind::Cycle => {
                    let n = format!("test_cycle_{cycle_count}");
                    cycle_count += 1;
                    n
                }
                ScenarioKind::Path => {
                    let n = format!("test_path_{path_count}");
                    path_count += 1;
                    n
                }
            };
            self.emit_scenario(&name, scenario);
            names.push(name);
        }

        self.separator();
        self.line("//! \\brief Run every scenario in deterministic order.");
        self.separator();
        self.line("int main()");
        self.line("{");
        for name in &names {
            self.line(format!("    {name}();"));
        }
        self.line("    printf(\"Unit tests done with success\\n\");");
        self.line("    return EXIT_SUCCESS;");
        self.line("}");
        Ok(self.out)
    }

    fn guard_knob(&self, e: EdgeIndex) -> String {
        format!("g_{}", self.suffix(e))
    }

    fn action_counter(&self, e: EdgeIndex) -> String {
        format!("n_tr_{}", self.suffix(e))
    }

    fn emit_stub_class(&mut self) {
        let class = self.class_name.clone();
        self.separator();
        self.line(format!(
            "//! \\brief {class} with every MOCKABLE hook replaced by a knob or a counter."
        ));
        self.separator();
        self.line(format!("class {class}Stub : public {class}"));
        self.line("{");
        self.line("public:");
        self.line(format!("    using {class}::{class};"));
        self.blank();

        let edges: Vec<EdgeIndex> = self.m.transitions().collect();
        for &e in &edges {
            if self.m.transition(e).guard.is_some() {
                self.line(format!("    bool {} = true;", self.guard_knob(e)));
            }
        }
        for &e in &edges {
            if self.m.transition(e).action.is_some() {
                self.line(format!("    unsigned {} = 0u;", self.action_counter(e)));
            }
        }
        let nodes: Vec<NodeIndex> = self.m.normal_states().collect();
        for &n in &nodes {
            let tag = self.tag(n).to_string();
            if !self.m.state(n).entry.is_empty() {
                self.line(format!("    unsigned n_entry_{tag} = 0u;"));
            }
            if !self.m.state(n).exit.is_empty() {
                self.line(format!("    unsigned n_exit_{tag} = 0u;"));
            }
        }
        self.blank();
        for &e in &edges {
            if self.m.transition(e).guard.is_some() {
                self.line(format!(
                    "    bool {}() override {{ return {}; }}",
                    self.guard_hook(e),
                    self.guard_knob(e)
                ));
            }
        }
        for &e in &edges {
            if self.m.transition(e).action.is_some() {
                self.line(format!(
                    "    void {}() override {{ ++{}; }}",
                    self.action_hook(e),
                    self.action_counter(e)
                ));
            }
        }
        for &n in &nodes {
            let tag = self.tag(n).to_string();
            if !self.m.state(n).entry.is_empty() {
                self.line(format!(
                    "    void onEntering_{tag}() override {{ ++n_entry_{tag}; }}"
                ));
            }
            if !self.m.state(n).exit.is_empty() {
                self.line(format!(
                    "    void onLeaving_{tag}() override {{ ++n_exit_{tag}; }}"
                ));
            }
        }
        self.line("};");
        self.blank();
    }

    fn expect_asserts(&mut self, n: NodeIndex) {
        let enum_ref = self.enum_ref(n);
        let name_str = self.state_str(n);
        self.line(format!("    assert(fsm.state() == {enum_ref});"));
        self.line(format!("    assert(strcmp(fsm.c_str(), {name_str}) == 0);"));
    }

    fn emit_scenario(&mut self, name: &str, scenario: &Scenario) {
        self.separator();
        self.line(format!("//! \\brief {}", scenario.title));
        self.separator();
        self.line(format!("static void {name}()"));
        self.line("{");
        self.line(format!(
            "    printf(\"[TEST] {}\\n\");",
            scenario.title.replace('"', "'")
        ));

        if scenario.kind == ScenarioKind::InitialState {
            // Real machine, real guards: the destination depends on runtime
            // values, hence a set-membership assertion.
            self.line(format!("    {} fsm;", self.class_name));
            self.line("    fsm.reset();");
            let states: Vec<String> = scenario
                .initial_candidates
                .iter()
                .map(|&n| format!("fsm.state() == {}", self.enum_ref(n)))
                .collect();
            self.line(format!("    assert({});", states.join("\n        || ")));
            let strings: Vec<String> = scenario
                .initial_candidates
                .iter()
                .map(|&n| format!("strcmp(fsm.c_str(), {}) == 0", self.state_str(n)))
                .collect();
            self.line(format!("    assert({});", strings.join("\n        || ")));
            self.line("}");
            self.blank();
            return;
        }

        self.line(format!("    {}Stub fsm;", self.class_name));
        for &(e, value) in &scenario.guard_values {
            self.line(format!(
                "    fsm.{} = {};",
                self.guard_knob(e),
                if value { "true" } else { "false" }
            ));
        }
        self.line("    fsm.reset();");

        for step in &scenario.steps {
            match *step {
                Step::Expect(n) => self.expect_asserts(n),
                Step::Fire(e) => {
                    // Fire steps are built from eventful edges only.
                    let Some(event) = self.m.transition(e).event.clone() else {
                        continue;
                    };
                    let method = self.event_methods[&event.name].clone();
                    let args = event.params.as_deref().map_or(String::new(), param_args);
                    self.line(format!("    fsm.{method}({args});"));
                }
            }
        }

        for &(e, count) in &scenario.action_counts {
            self.line(format!(
                "    assert(fsm.{} == {count}u);",
                self.action_counter(e)
            ));
        }
        for &(n, count) in &scenario.entry_counts {
            self.line(format!("    assert(fsm.n_entry_{} == {count}u);", self.tag(n)));
        }
        for &(n, count) in &scenario.exit_counts {
            self.line(format!("    assert(fsm.n_exit_{} == {count}u);", self.tag(n)));
        }
        self.line("}");
        self.blank();
    }

    fn separator(&mut self) {
        self.line("// ----------------------------------------------------------------------------");
    }

    fn method_comment(&mut self, text: &str) {
        self.line("    // ------------------------------------------------------------------------");
        self.line(format!("    //! \\brief {text}"));
        self.line("    // ------------------------------------------------------------------------");
    }
}

fn collision(name: &str) -> ScError {
    ScError::Emit {
        backend: BACKEND_NAME,
        message: format!("identifier collision after escaping: '{name}'"),
    }
}

/// Render an opaque body as one statement line.
fn statement(body: &str) -> String {
    let trimmed = body.trim_end();
    if trimmed.ends_with(';') || trimmed.ends_with('}') {
        trimmed.to_string()
    } else {
        format!("{trimmed};")
    }
}

/// Extract call arguments from an opaque parameter list: the last
/// identifier-like token of each comma segment (`int speed` -> `speed`).
fn param_args(params: &str) -> String {
    params
        .split(',')
        .filter_map(|segment| {
            segment
                .split_whitespace()
                .last()
                .map(|word| word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_'))
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Diagnostics;
    use crate::machine;
    use crate::parser;
    use crate::scenario;

    fn gumball() -> Machine {
        let text = "@startuml\n\
            '[code] int gumballs = 2;\n\
            '[brief] Dispenses gumballs while stock lasts.\n\
            [*] --> NoQuarter : [ gumballs > 0 ]\n\
            [*] --> OutOfGumballs : [ gumballs == 0 ]\n\
            NoQuarter --> HasQuarter : insertQuarter\n\
            HasQuarter --> GumballSold : turnCrank / --gumballs\n\
            GumballSold --> NoQuarter : [ gumballs > 0 ]\n\
            GumballSold --> OutOfGumballs : [ gumballs == 0 ]\n\
            @enduml\n";
        let mut diags = Diagnostics::new();
        let decls = parser::parse("gumball.plantuml", text, &mut diags).unwrap();
        machine::build("Gumball", &decls, "gumball.plantuml").unwrap()
    }

    #[test]
    fn test_escape_ident_passthrough() {
        let backend = CppBackend;
        assert_eq!(backend.escape_ident("NoQuarter").unwrap(), "NoQuarter");
        assert_eq!(backend.escape_ident("_private2").unwrap(), "_private2");
    }

    #[test]
    fn test_escape_ident_invalid_chars() {
        let backend = CppBackend;
        assert_eq!(backend.escape_ident("Etat-1").unwrap(), "Etat_x2d1");
        assert_eq!(backend.escape_ident("2fast").unwrap(), "_2fast");
    }

    #[test]
    fn test_escape_ident_reserved_refused() {
        let backend = CppBackend;
        assert!(backend.escape_ident("MAX_STATES").is_err());
        assert!(backend.escape_ident("class").is_err());
        assert!(backend.escape_ident("reset").is_err());
    }

    #[test]
    fn test_string_literal() {
        let backend = CppBackend;
        assert_eq!(backend.string_literal("[*]"), "\"[*]\"");
        assert_eq!(backend.string_literal("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn test_file_names() {
        let backend = CppBackend;
        assert_eq!(
            backend.machine_file_name("Gumball", OutputKind::Source),
            "Gumball.cpp"
        );
        assert_eq!(
            backend.machine_file_name("Gumball", OutputKind::Header),
            "Gumball.hpp"
        );
        assert_eq!(backend.test_file_name("Gumball"), "GumballTests.cpp");
    }

    #[test]
    fn test_machine_artifact_structure() {
        let backend = CppBackend;
        let m = gumball();
        let text = backend.render_machine(&m, OutputKind::Header, &[]).unwrap();
        assert!(text.contains("#ifndef GUMBALL_GENERATED_HPP"));
        assert!(text.contains("enum GumballStates"));
        assert!(text.contains("NoQuarter,"));
        assert!(text.contains("INITIAL_STATE, IGNORING_EVENT, CANNOT_HAPPEN, MAX_STATES"));
        assert!(text.contains("class Gumball : public StateMachine<Gumball, GumballStates>"));
        assert!(text.contains("void insertQuarter()"));
        assert!(text.contains("void turnCrank()"));
        assert!(text.contains("MOCKABLE bool onGuarding_Start_NoQuarter()"));
        assert!(text.contains("MOCKABLE void onTransitioning_HasQuarter_GumballSold_turnCrank()"));
        assert!(text.contains("void onCompletion_GumballSold()"));
        // embedded slots land verbatim
        assert!(text.contains("int gumballs = 2;"));
        assert!(text.contains("//! \\brief Dispenses gumballs while stock lasts."));
        // verbatim state names survive in stringify
        assert!(text.contains("return \"NoQuarter\";"));
    }

    #[test]
    fn test_warnings_forwarded() {
        let backend = CppBackend;
        let m = gumball();
        let text = backend
            .render_machine(&m, OutputKind::Source, &["possible \"deadlock\"".to_string()])
            .unwrap();
        assert!(text.contains("#warning \"possible 'deadlock'\""));
    }

    #[test]
    fn test_test_artifact_structure() {
        let backend = CppBackend;
        let m = gumball();
        let scenarios = scenario::synthesize(&m);
        let text = backend
            .render_tests(&m, &scenarios, OutputKind::Header)
            .unwrap();
        assert!(text.contains("#define MOCKABLE virtual"));
        assert!(text.contains("#include \"Gumball.hpp\""));
        assert!(text.contains("class GumballStub : public Gumball"));
        assert!(text.contains("bool onGuarding_Start_NoQuarter() override"));
        assert!(text.contains("static void test_initial_state()"));
        assert!(text.contains("static void test_cycle_0()"));
        assert!(text.contains("fsm.insertQuarter();"));
        assert!(text.contains("int main()"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let backend = CppBackend;
        let m = gumball();
        let scenarios = scenario::synthesize(&m);
        let a = backend.render_machine(&m, OutputKind::Source, &[]).unwrap();
        let b = backend.render_machine(&m, OutputKind::Source, &[]).unwrap();
        assert_eq!(a, b);
        let ta = backend.render_tests(&m, &scenarios, OutputKind::Source).unwrap();
        let tb = backend.render_tests(&m, &scenarios, OutputKind::Source).unwrap();
        assert_eq!(ta, tb);
    }

    #[test]
    fn test_param_args() {
        assert_eq!(param_args("int speed"), "speed");
        assert_eq!(param_args("int a, float b"), "a, b");
        assert_eq!(param_args("x"), "x");
    }

    #[test]
    fn test_statement_termination() {
        assert_eq!(statement("--gumballs"), "--gumballs;");
        assert_eq!(statement("done();"), "done();");
        assert_eq!(statement("if (x) { y(); }"), "if (x) { y(); }");
    }
}
