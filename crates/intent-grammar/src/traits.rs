use crate::decode::Recognition;
use crate::fst::{Arc, Automaton};
use crate::symbols::Symbol;
use std::collections::BTreeSet;

/// Matches token sequences against a compiled automaton.
///
/// Implementations never fail: "no match" is reported as a recognition whose
/// intent has no name.
pub trait Recognizer: Send + Sync {
    /// Recognize already tokenized (and cased) input.
    fn recognize(&self, tokens: &[String]) -> Recognition;

    /// The automaton being matched against.
    fn automaton(&self) -> &Automaton;

    /// Split on whitespace and recognize.
    fn recognize_text(&self, text: &str) -> Recognition {
        let tokens: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        self.recognize(&tokens)
    }
}

/// False for arcs opening an intent outside `filter`
pub(crate) fn intent_allowed(filter: Option<&BTreeSet<String>>, arc: &Arc) -> bool {
    match (filter, &arc.olabel) {
        (Some(names), Some(Symbol::IntentOpen(name))) => names.contains(name),
        _ => true,
    }
}
