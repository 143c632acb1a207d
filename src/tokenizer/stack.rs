use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ZafferanoResult};
use crate::grammars::{CollectionId, Grammar, Rule, RuleId};
use crate::scope::Scope;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    /// Region rule that opened this frame, `None` for the root frame
    pub rule: Option<RuleId>,
    /// "name" scopes - applied to begin/end delimiters
    pub name_scopes: Vec<Scope>,
    /// "contentName" scopes - applied to what is between the delimiters
    pub content_scopes: Vec<Scope>,
    /// End pattern with `\1`, `\2` etc resolved from the begin captures.
    /// `None` when the rule end pattern has no backreferences.
    pub end_pattern: Option<String>,
    /// The begin match ended at the end of its line.
    /// This means that `\G` is active at the start of the next line.
    pub begin_captured_eol: bool,
    /// Where `\G` matches in the current line
    pub anchor_position: Option<usize>,
    /// Where the begin match started in the current line.
    /// `None` once the region spans more than one line.
    pub entered_at: Option<usize>,
}

/// The regions currently open, the root frame being always at the bottom.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateStack {
    frames: Vec<StackFrame>,
    /// `\A` can only match on the first line of a document
    first_line: bool,
}

impl StateStack {
    pub fn new(grammar: &Grammar) -> Self {
        Self {
            frames: vec![StackFrame {
                rule: None,
                name_scopes: vec![grammar.scope().clone()],
                content_scopes: vec![grammar.scope().clone()],
                end_pattern: None,
                begin_captured_eol: false,
                anchor_position: None,
                entered_at: None,
            }],
            first_line: true,
        }
    }

    /// Called when a region begin pattern matches
    pub fn push(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    /// Exits the current region. Popping the root frame does nothing.
    pub fn pop(&mut self) -> Option<StackFrame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Access the top frame of the stack
    pub fn top(&self) -> &StackFrame {
        self.frames.last().expect("stack never empty")
    }

    pub fn top_mut(&mut self) -> &mut StackFrame {
        self.frames.last_mut().expect("stack never empty")
    }

    /// How many regions are open
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn is_first_line(&self) -> bool {
        self.first_line
    }

    /// The collection whose rules can match in the current context
    pub fn active_collection(&self, grammar: &Grammar) -> CollectionId {
        match self.top().rule.map(|id| grammar.rule(id)) {
            Some(Rule::BeginEnd(b)) => b.patterns,
            _ => grammar.registry().root(),
        }
    }

    /// Whether `rule` was already entered at `pos` in this line
    pub(crate) fn has_entered(&self, rule: RuleId, pos: usize) -> bool {
        self.frames
            .iter()
            .any(|f| f.rule == Some(rule) && f.entered_at == Some(pos))
    }

    /// Resets the positions, which are only relative to the line that was just scanned,
    /// so that states from different lines with the same open regions compare equal.
    pub(crate) fn finish_line(&mut self) {
        for frame in &mut self.frames {
            frame.entered_at = None;
            frame.anchor_position = None;
        }
        self.first_line = false;
    }

    /// Checks a state from the outside can be used with that grammar
    pub(crate) fn validate(&self, grammar: &Grammar) -> ZafferanoResult<()> {
        let Some((root, regions)) = self.frames.split_first() else {
            return Err(Error::InvalidState("the stack has no root frame".to_owned()));
        };
        if root.rule.is_some() {
            return Err(Error::InvalidState(
                "the root frame refers to a rule".to_owned(),
            ));
        }
        for frame in regions {
            let rule = frame.rule.and_then(|id| grammar.registry().get_rule(id));
            if !matches!(rule, Some(Rule::BeginEnd(_))) {
                return Err(Error::InvalidState(format!(
                    "frame refers to {:?} which is not a region of '{}'",
                    frame.rule,
                    grammar.scope_name()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "StateStack (first_line={}):", self.first_line)?;

        for (depth, frame) in self.frames.iter().enumerate() {
            let indent = "  ".repeat(depth);
            write!(f, "{}rule={:?}", indent, frame.rule.map(|r| r.0))?;

            if !frame.name_scopes.is_empty() {
                let names: Vec<_> = frame.name_scopes.iter().map(|s| s.as_str()).collect();
                write!(f, " name=[{}]", names.join(", "))?;
            }

            if frame.content_scopes != frame.name_scopes {
                let names: Vec<_> = frame.content_scopes.iter().map(|s| s.as_str()).collect();
                write!(f, ", content=[{}]", names.join(", "))?;
            }

            if let Some(pattern) = &frame.end_pattern {
                write!(f, ", end_pattern=\"{}\"", pattern)?;
            }

            write!(f, ", anchor_pos={:?}", frame.anchor_position)?;

            if let Some(pos) = frame.entered_at {
                write!(f, ", entered_at={}", pos)?;
            }

            writeln!(f)?;
        }

        Ok(())
    }
}

/// Opaque snapshot of the scope stack at the end of a line.
///
/// Two snapshots compare equal when the same regions are open in the same way, which
/// is what an editor needs to know to stop re-highlighting after an edit.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackState(pub(crate) StateStack);

impl StackState {
    /// State at the start of a document
    pub fn initial(grammar: &Grammar) -> Self {
        Self(StateStack::new(grammar))
    }

    /// Number of regions open
    pub fn depth(&self) -> usize {
        self.0.depth()
    }

    /// Scopes of the region content, outermost first
    pub fn scopes(&self) -> &[Scope] {
        &self.0.top().content_scopes
    }

    /// Whether only the root frame remains
    pub fn is_root(&self) -> bool {
        self.0.depth() == 0
    }

    #[cfg(feature = "dump")]
    /// A compact binary version of the state, to store alongside a line
    pub fn to_bytes(&self) -> ZafferanoResult<Vec<u8>> {
        Ok(bitcode::serialize(self)?)
    }

    #[cfg(feature = "dump")]
    pub fn from_bytes(bytes: &[u8]) -> ZafferanoResult<Self> {
        Ok(bitcode::deserialize(bytes)?)
    }
}

impl fmt::Debug for StackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
