//! AST declaration types.
//!
//! The parser reduces each source line to one of these declarations; the
//! graph builder folds them into a [`crate::machine::Machine`]. Arrow
//! direction is already normalized here: `A <- B` parses to the same
//! [`TransitionDecl`] as `B -> A`.

/// 1-based source position of the token a declaration starts at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

/// A state token as written in the source. `[*]` resolves by its normalized
/// side: source position means the initial pseudo-state, destination position
/// the final pseudo-state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateRef {
    Initial,
    Final,
    Named(String),
}

/// Event part of a transition label. Multi-word names are camel-joined
/// (`set speed` becomes `setSpeed`); a trailing parenthesized parameter list
/// is captured verbatim and never interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDecl {
    pub name: String,
    pub params: Option<String>,
}

/// `source ARROW destination : event [ guard ] / action`, or the internal
/// reaction `State : on event [ guard ] / action` (then `internal` is set and
/// source equals destination).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionDecl {
    pub source: StateRef,
    pub destination: StateRef,
    pub event: Option<EventDecl>,
    pub guard: Option<String>,
    pub action: Option<String>,
    pub internal: bool,
    pub pos: Pos,
}

/// Which per-state attribute a `State : kind / body` line sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateActionKind {
    Entry,
    Exit,
    Comment,
}

/// `State : entry / body` and friends (`entering`/`leaving` are aliases).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateActionDecl {
    pub state: String,
    pub kind: StateActionKind,
    pub body: String,
    pub pos: Pos,
}

/// Embedded-code slots recognized after a leading `'`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Header,
    Footer,
    Param,
    Cons,
    Init,
    Code,
    Test,
    Brief,
}

impl Slot {
    /// Map a bracketed tag (`[header]`, ...) to its slot.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "[header]" => Some(Slot::Header),
            "[footer]" => Some(Slot::Footer),
            "[param]" => Some(Slot::Param),
            "[cons]" => Some(Slot::Cons),
            "[init]" => Some(Slot::Init),
            "[code]" => Some(Slot::Code),
            "[test]" => Some(Slot::Test),
            "[brief]" => Some(Slot::Brief),
            _ => None,
        }
    }
}

/// Verbatim text bound to an embedded-code slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDecl {
    pub slot: Slot,
    pub text: String,
    pub pos: Pos,
}

/// One top-level declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decl {
    Transition(TransitionDecl),
    StateAction(StateActionDecl),
    Slot(SlotDecl),
}
