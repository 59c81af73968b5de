//! PlantUML statechart parser.
//!
//! Line oriented: every declaration ends at its end of line, and the
//! separators `->`, `:`, `[`, `]`, `/` are whitespace-delimited tokens, so
//! embedded guard/action text is never split. The action continuation
//! `\n--\n` (the literal backslash sequence PlantUML uses for multi-line
//! labels) is spliced into the action separator before tokenizing.
//!
//! Recovery is per line: a malformed line is reported and skipped, the sweep
//! continues, and the pipeline aborts only after every line has been tried.

pub mod ast;

use crate::diag::Diagnostics;
use crate::error::{ScError, ScResult};
use ast::{
    Decl, EventDecl, Pos, Slot, SlotDecl, StateActionDecl, StateActionKind, StateRef,
    TransitionDecl,
};

const ARROWS: [&str; 4] = ["->", "-->", "<-", "<--"];

/// A token with the 1-based column it starts at.
#[derive(Debug, Clone)]
struct Tok {
    text: String,
    col: u32,
}

fn tokenize(line: &str) -> Vec<Tok> {
    let mut toks = Vec::new();
    let mut current = String::new();
    let mut start = 0u32;
    for (i, ch) in line.char_indices() {
        if ch.is_whitespace() {
            if !current.is_empty() {
                toks.push(Tok {
                    text: std::mem::take(&mut current),
                    col: start + 1,
                });
            }
        } else {
            if current.is_empty() {
                start = i as u32;
            }
            current.push(ch);
        }
    }
    if !current.is_empty() {
        toks.push(Tok { text: current, col: start + 1 });
    }
    toks
}

/// Parse a statechart source into declarations. Parse errors are collected
/// in `diags`; if any were found the sweep still completes and then fails
/// with [`ScError::Parse`]. Unknown state-declaration keywords are shape
/// errors and abort immediately.
pub fn parse(file: &str, text: &str, diags: &mut Diagnostics) -> ScResult<Vec<Decl>> {
    let before = diags.error_count();
    let mut decls = Vec::new();
    let mut opened = false;
    let mut closed = false;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = (idx + 1) as u32;
        if closed {
            break;
        }
        let line = raw_line.replace("\\n--\\n", " / ");
        let toks = tokenize(&line);
        if toks.is_empty() {
            continue;
        }

        // Quote lines: embedded-code directives or plain comments.
        if let Some(rest) = toks[0].text.strip_prefix('\'') {
            let tag_tok = if rest.is_empty() {
                toks.get(1).map(|t| t.text.as_str())
            } else {
                Some(rest)
            };
            if let Some(slot) = tag_tok.and_then(Slot::from_tag) {
                decls.push(Decl::Slot(SlotDecl {
                    slot,
                    text: slot_text(&line),
                    pos: Pos { line: line_no, col: toks[0].col },
                }));
            } else {
                tracing::debug!("skipping comment at {}:{}", file, line_no);
            }
            continue;
        }

        if !opened {
            if toks[0].text == "@startuml" {
                opened = true;
            } else {
                diags.error(
                    file,
                    line_no,
                    toks[0].col,
                    "expected @startuml before the first declaration",
                );
                opened = true; // report once, keep sweeping
            }
            if toks[0].text == "@startuml" {
                continue;
            }
        }
        if toks[0].text == "@enduml" {
            closed = true;
            continue;
        }
        if matches!(toks[0].text.as_str(), "hide" | "scale" | "skin" | "skinparam") {
            continue;
        }

        if toks.len() >= 3 && ARROWS.contains(&toks[1].text.as_str()) {
            match parse_transition(file, line_no, &toks, false, diags) {
                Ok(decl) => decls.push(Decl::Transition(decl)),
                Err(()) => {}
            }
        } else if toks.len() >= 3 && toks[1].text == ":" {
            parse_state(file, line_no, &toks, diags, &mut decls)?;
        } else if toks.len() >= 2 && looks_like_arrow(&toks[1].text) {
            diags.error(
                file,
                line_no,
                toks[1].col,
                format!("unknown arrow shape '{}'", toks[1].text),
            );
        } else {
            diags.error(
                file,
                line_no,
                toks[0].col,
                "expected a transition or a state declaration",
            );
        }
    }

    let errors = diags.error_count() - before;
    if errors > 0 {
        return Err(ScError::Parse { file: file.to_string(), errors });
    }
    Ok(decls)
}

fn looks_like_arrow(tok: &str) -> bool {
    !ARROWS.contains(&tok) && (tok.starts_with('-') || tok.starts_with('<')) && tok.contains('-')
}

/// Verbatim slot payload: everything after the bracketed tag, minus one
/// leading space.
fn slot_text(line: &str) -> String {
    match line.find(']') {
        Some(i) => {
            let rest = &line[i + 1..];
            rest.strip_prefix(' ').unwrap_or(rest).to_string()
        }
        None => String::new(),
    }
}

fn state_ref(token: &str, is_source: bool) -> StateRef {
    if token == "[*]" {
        if is_source {
            StateRef::Initial
        } else {
            StateRef::Final
        }
    } else {
        StateRef::Named(token.to_string())
    }
}

/// Parse `LHS ARROW RHS (':' label)?`. Reports into `diags` and returns
/// `Err(())` on malformed labels so the caller can skip the line.
fn parse_transition(
    file: &str,
    line_no: u32,
    toks: &[Tok],
    internal: bool,
    diags: &mut Diagnostics,
) -> Result<TransitionDecl, ()> {
    let reversed = toks[1].text.starts_with('<');
    let (src_tok, dst_tok) = if reversed {
        (&toks[2], &toks[0])
    } else {
        (&toks[0], &toks[2])
    };
    let source = state_ref(&src_tok.text, true);
    let destination = state_ref(&dst_tok.text, false);
    let pos = Pos { line: line_no, col: toks[0].col };

    let mut event = None;
    let mut guard = None;
    let mut action = None;

    if toks.len() > 3 {
        if toks[3].text != ":" {
            diags.error(
                file,
                line_no,
                toks[3].col,
                "expected ':' before the transition label",
            );
            return Err(());
        }

        let mut i = 4;
        let mut event_toks = Vec::new();
        while i < toks.len() && toks[i].text != "[" && toks[i].text != "/" {
            event_toks.push(&toks[i]);
            i += 1;
        }
        if let Some(first) = event_toks.first() {
            if first.text == "on" && !internal {
                diags.error(
                    file,
                    line_no,
                    first.col,
                    "'on' reactions are only valid in a state declaration \
                     (State : on event ...)",
                );
                return Err(());
            }
        }
        event = parse_event(&event_toks);
        if internal && event.is_none() {
            diags.error(
                file,
                line_no,
                toks[2].col,
                "an internal reaction requires an event ('on' with no event \
                 is not a completion transition)",
            );
            return Err(());
        }

        if i < toks.len() && toks[i].text == "[" {
            let open_col = toks[i].col;
            let start = i + 1;
            let mut j = start;
            while j < toks.len() && toks[j].text != "]" {
                j += 1;
            }
            if j == toks.len() {
                diags.error(file, line_no, open_col, "unterminated guard bracket");
                return Err(());
            }
            let text = join(&toks[start..j]);
            if !text.is_empty() {
                guard = Some(text);
            }
            i = j + 1;
        }

        if i < toks.len() {
            if toks[i].text != "/" {
                diags.error(
                    file,
                    line_no,
                    toks[i].col,
                    format!("expected '/' before the action, found '{}'", toks[i].text),
                );
                return Err(());
            }
            let text = join(&toks[i + 1..]);
            if !text.is_empty() {
                action = Some(text);
            }
        }
    }

    Ok(TransitionDecl { source, destination, event, guard, action, internal, pos })
}

fn join(toks: &[Tok]) -> String {
    toks.iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse the event part of a label: camel-join multi-word names, split off a
/// trailing parenthesized parameter list verbatim.
fn parse_event(toks: &[&Tok]) -> Option<EventDecl> {
    if toks.is_empty() {
        return None;
    }
    let raw = toks
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let (name_part, params) = match raw.find('(') {
        Some(i) => {
            let inner = raw[i + 1..].trim_end();
            let inner = inner.strip_suffix(')').unwrap_or(inner).trim();
            let params = if inner.is_empty() {
                None
            } else {
                Some(inner.to_string())
            };
            (raw[..i].trim().to_string(), params)
        }
        None => (raw, None),
    };
    let mut words = name_part.split_whitespace();
    let mut name = words.next().unwrap_or("").to_string();
    for w in words {
        name.push_str(&capitalize(w));
    }
    if name.is_empty() {
        return None;
    }
    Some(EventDecl { name, params })
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Parse `STATE ':' kind ...`. The `on` kind re-enters the transition parser
/// with a synthetic self-loop; unknown kinds are shape errors.
fn parse_state(
    file: &str,
    line_no: u32,
    toks: &[Tok],
    diags: &mut Diagnostics,
    decls: &mut Vec<Decl>,
) -> ScResult<()> {
    let name = toks[0].text.clone();
    let kind = toks[2].text.to_lowercase();
    let pos = Pos { line: line_no, col: toks[0].col };

    let action_kind = match kind.as_str() {
        "entry" | "entering" => Some(StateActionKind::Entry),
        "exit" | "leaving" => Some(StateActionKind::Exit),
        "comment" => Some(StateActionKind::Comment),
        _ => None,
    };
    if let Some(action_kind) = action_kind {
        if toks.len() < 4 || (toks[3].text != "/" && toks[3].text != ":") {
            diags.error(
                file,
                line_no,
                toks[2].col,
                format!("expected '/' after '{kind}'"),
            );
            return Ok(());
        }
        let body = join(&toks[4..]);
        if !body.is_empty() {
            decls.push(Decl::StateAction(StateActionDecl {
                state: name,
                kind: action_kind,
                body,
                pos,
            }));
        }
        return Ok(());
    }

    match kind.as_str() {
        "on" => {
            // Rewrite as a self-transition so traversal algorithms see it;
            // the internal flag keeps entry/exit from firing.
            let mut synth: Vec<Tok> = vec![
                Tok { text: name.clone(), col: toks[0].col },
                Tok { text: "->".to_string(), col: toks[1].col },
                Tok { text: name, col: toks[0].col },
                Tok { text: ":".to_string(), col: toks[1].col },
            ];
            synth.extend(toks[3..].iter().cloned());
            if let Ok(decl) = parse_transition(file, line_no, &synth, true, diags) {
                decls.push(Decl::Transition(decl));
            }
            Ok(())
        }
        "do" | "activity" => {
            diags.error(
                file,
                line_no,
                toks[2].col,
                "state activities ('do') are not supported",
            );
            Ok(())
        }
        other => Err(ScError::Shape {
            file: file.to_string(),
            line: line_no,
            message: format!("unknown state declaration kind '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(text: &str) -> Vec<Decl> {
        let mut diags = Diagnostics::new();
        let decls = parse("test.plantuml", text, &mut diags);
        assert!(!diags.has_errors(), "unexpected diagnostics");
        decls.unwrap()
    }

    fn first_transition(decls: &[Decl]) -> &TransitionDecl {
        decls
            .iter()
            .find_map(|d| match d {
                Decl::Transition(t) => Some(t),
                _ => None,
            })
            .expect("no transition parsed")
    }

    #[test]
    fn test_simple_transition() {
        let decls = parse_ok("@startuml\nIdle -> Starting : setSpeed\n@enduml\n");
        let tr = first_transition(&decls);
        assert_eq!(tr.source, StateRef::Named("Idle".into()));
        assert_eq!(tr.destination, StateRef::Named("Starting".into()));
        assert_eq!(tr.event.as_ref().unwrap().name, "setSpeed");
        assert!(tr.guard.is_none());
        assert!(!tr.internal);
    }

    #[test]
    fn test_reversed_arrow_normalizes() {
        let decls = parse_ok("@startuml\nIdle <-- Stopping\n@enduml\n");
        let tr = first_transition(&decls);
        assert_eq!(tr.source, StateRef::Named("Stopping".into()));
        assert_eq!(tr.destination, StateRef::Named("Idle".into()));
        assert!(tr.event.is_none());
    }

    #[test]
    fn test_pseudo_states_by_position() {
        let decls = parse_ok("@startuml\n[*] --> Idle\nDone --> [*]\n@enduml\n");
        match &decls[0] {
            Decl::Transition(t) => assert_eq!(t.source, StateRef::Initial),
            other => panic!("unexpected decl {other:?}"),
        }
        match &decls[1] {
            Decl::Transition(t) => assert_eq!(t.destination, StateRef::Final),
            other => panic!("unexpected decl {other:?}"),
        }
    }

    #[test]
    fn test_guard_and_action() {
        let decls =
            parse_ok("@startuml\n[*] --> NoQuarter : [ gumballs > 0 ] / refill()\n@enduml\n");
        let tr = first_transition(&decls);
        assert!(tr.event.is_none());
        assert_eq!(tr.guard.as_deref(), Some("gumballs > 0"));
        assert_eq!(tr.action.as_deref(), Some("refill()"));
    }

    #[test]
    fn test_action_continuation_splice() {
        let decls = parse_ok(
            "@startuml\nHasQuarter --> GumballSold : turnCrank \\n--\\n --gumballs\n@enduml\n",
        );
        let tr = first_transition(&decls);
        assert_eq!(tr.event.as_ref().unwrap().name, "turnCrank");
        assert_eq!(tr.action.as_deref(), Some("--gumballs"));
    }

    #[test]
    fn test_multiword_event_camel_joined() {
        let decls = parse_ok("@startuml\nIdle -> Starting : set speed\n@enduml\n");
        let tr = first_transition(&decls);
        assert_eq!(tr.event.as_ref().unwrap().name, "setSpeed");
    }

    #[test]
    fn test_event_params_opaque() {
        let decls = parse_ok("@startuml\nIdle -> Starting : setSpeed(int speed)\n@enduml\n");
        let ev = first_transition(&decls).event.as_ref().unwrap().clone();
        assert_eq!(ev.name, "setSpeed");
        assert_eq!(ev.params.as_deref(), Some("int speed"));
    }

    #[test]
    fn test_state_entry_and_aliases() {
        let decls = parse_ok(
            "@startuml\nPocket : entry / greet()\nPocket : entering / wave()\n@enduml\n",
        );
        let kinds: Vec<_> = decls
            .iter()
            .map(|d| match d {
                Decl::StateAction(a) => (a.kind, a.body.clone()),
                other => panic!("unexpected decl {other:?}"),
            })
            .collect();
        assert_eq!(kinds[0], (StateActionKind::Entry, "greet()".to_string()));
        assert_eq!(kinds[1], (StateActionKind::Entry, "wave()".to_string()));
    }

    #[test]
    fn test_internal_reaction() {
        let decls = parse_ok("@startuml\nIdle : on ping [ alive ] / pong()\n@enduml\n");
        let tr = first_transition(&decls);
        assert!(tr.internal);
        assert_eq!(tr.source, tr.destination);
        assert_eq!(tr.event.as_ref().unwrap().name, "ping");
        assert_eq!(tr.guard.as_deref(), Some("alive"));
    }

    #[test]
    fn test_internal_reaction_without_event_rejected() {
        let mut diags = Diagnostics::new();
        let res = parse("t", "@startuml\nIdle : on / pong()\n@enduml\n", &mut diags);
        assert!(res.is_err());
        assert!(diags
            .iter()
            .any(|d| d.message.contains("internal reaction requires an event")));
    }

    #[test]
    fn test_on_in_plain_transition_rejected() {
        let mut diags = Diagnostics::new();
        let res = parse("t", "@startuml\nA -> B : on ping\n@enduml\n", &mut diags);
        assert!(res.is_err());
        assert!(diags
            .iter()
            .any(|d| d.message.contains("only valid in a state declaration")));
    }

    #[test]
    fn test_unterminated_guard() {
        let mut diags = Diagnostics::new();
        let res = parse("t", "@startuml\nA -> B : go [ x > 0\n@enduml\n", &mut diags);
        assert!(res.is_err());
        let d = diags.iter().next().unwrap();
        assert!(d.message.contains("unterminated guard"));
        assert_eq!(d.line, 2);
    }

    #[test]
    fn test_unknown_arrow_shape() {
        let mut diags = Diagnostics::new();
        let res = parse("t", "@startuml\nA ->> B\n@enduml\n", &mut diags);
        assert!(res.is_err());
        assert!(diags.iter().any(|d| d.message.contains("unknown arrow shape")));
    }

    #[test]
    fn test_missing_startuml() {
        let mut diags = Diagnostics::new();
        let res = parse("t", "A -> B\n", &mut diags);
        assert!(res.is_err());
        assert!(diags.iter().any(|d| d.message.contains("@startuml")));
    }

    #[test]
    fn test_unknown_state_kind_is_shape_error() {
        let mut diags = Diagnostics::new();
        let res = parse("t", "@startuml\nA : frobnicate / x\n@enduml\n", &mut diags);
        assert!(matches!(res, Err(ScError::Shape { line: 2, .. })));
    }

    #[test]
    fn test_do_activity_rejected() {
        let mut diags = Diagnostics::new();
        let res = parse("t", "@startuml\nA : do / spin\n@enduml\n", &mut diags);
        assert!(res.is_err());
        assert!(diags.iter().any(|d| d.message.contains("not supported")));
    }

    #[test]
    fn test_slots_and_comments() {
        let decls = parse_ok(
            "@startuml\n\
             '[header] #include <cstdint>\n\
             ' just a comment, discarded\n\
             '[code] uint32_t gumballs = 2;\n\
             '[brief] A gumball dispenser.\n\
             [*] --> NoQuarter\n\
             @enduml\n",
        );
        let slots: Vec<_> = decls
            .iter()
            .filter_map(|d| match d {
                Decl::Slot(s) => Some((s.slot, s.text.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0], (Slot::Header, "#include <cstdint>".to_string()));
        assert_eq!(slots[1], (Slot::Code, "uint32_t gumballs = 2;".to_string()));
        assert_eq!(slots[2], (Slot::Brief, "A gumball dispenser.".to_string()));
    }

    #[test]
    fn test_recovery_reports_every_bad_line() {
        let mut diags = Diagnostics::new();
        let res = parse(
            "t",
            "@startuml\nA -> B : go [ x\nC ->> D\nE -> F : ok\n@enduml\n",
            &mut diags,
        );
        assert!(matches!(res, Err(ScError::Parse { errors: 2, .. })));
    }

    #[test]
    fn test_skipped_directives() {
        let decls = parse_ok("@startuml\nhide empty description\nscale 600 width\n@enduml\n");
        assert!(decls.is_empty());
    }
}
