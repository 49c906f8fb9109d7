//! Output symbols carried on automaton arcs
//!
//! Besides the words of a sentence, an accepted path carries marker symbols
//! that delimit the intent and its entities. Markers only ever appear as
//! output labels on epsilon-input arcs, so matching raw text never sees them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved prefix for every marker symbol. Template words may not start with it.
pub const MARKER_PREFIX: &str = "__";

const INTENT_OPEN: &str = "__intent__";
const INTENT_CLOSE: &str = "__end_intent__";
const ENTITY_OPEN: &str = "__begin__";
const ENTITY_CLOSE: &str = "__end__";

/// Separator between raw and substituted text
pub const SUBSTITUTION_SEPARATOR: char = ':';

/// An output label of an automaton arc
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Symbol {
    /// A word reported exactly as it was matched
    Word(String),
    /// A word reported as different text (either side may be empty)
    Substitution { raw: String, value: String },
    /// Start of an intent branch
    IntentOpen(String),
    /// End of an intent branch
    IntentClose,
    /// Start of a tagged span; `value` overrides the matched words
    EntityOpen { slot: String, value: Option<String> },
    /// End of the innermost tagged span
    EntityClose,
}

impl Symbol {
    pub fn word(text: impl Into<String>) -> Self {
        Symbol::Word(text.into())
    }

    pub fn substitution(raw: impl Into<String>, value: impl Into<String>) -> Self {
        Symbol::Substitution {
            raw: raw.into(),
            value: value.into(),
        }
    }

    pub fn entity(slot: impl Into<String>, value: Option<String>) -> Self {
        Symbol::EntityOpen {
            slot: slot.into(),
            value,
        }
    }

    /// True for intent/entity scope markers
    pub fn is_marker(&self) -> bool {
        matches!(
            self,
            Symbol::IntentOpen(_)
                | Symbol::IntentClose
                | Symbol::EntityOpen { .. }
                | Symbol::EntityClose
        )
    }

    /// Parse the textual form produced by `Display`.
    pub fn parse(text: &str) -> Self {
        if text == INTENT_CLOSE {
            return Symbol::IntentClose;
        }
        if text == ENTITY_CLOSE {
            return Symbol::EntityClose;
        }
        if let Some(name) = text.strip_prefix(INTENT_OPEN) {
            return Symbol::IntentOpen(name.to_string());
        }
        if let Some(tag) = text.strip_prefix(ENTITY_OPEN) {
            return match tag.split_once(SUBSTITUTION_SEPARATOR) {
                Some((slot, value)) => Symbol::entity(slot, Some(value.to_string())),
                None => Symbol::entity(tag, None),
            };
        }
        match text.split_once(SUBSTITUTION_SEPARATOR) {
            Some((raw, value)) => Symbol::substitution(raw, value),
            None => Symbol::Word(text.to_string()),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Word(word) => f.write_str(word),
            Symbol::Substitution { raw, value } => {
                write!(f, "{raw}{SUBSTITUTION_SEPARATOR}{value}")
            }
            Symbol::IntentOpen(name) => write!(f, "{INTENT_OPEN}{name}"),
            Symbol::IntentClose => f.write_str(INTENT_CLOSE),
            Symbol::EntityOpen { slot, value: None } => write!(f, "{ENTITY_OPEN}{slot}"),
            Symbol::EntityOpen {
                slot,
                value: Some(value),
            } => write!(f, "{ENTITY_OPEN}{slot}{SUBSTITUTION_SEPARATOR}{value}"),
            Symbol::EntityClose => f.write_str(ENTITY_CLOSE),
        }
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.to_string()
    }
}

impl From<String> for Symbol {
    fn from(text: String) -> Self {
        Symbol::parse(&text)
    }
}
