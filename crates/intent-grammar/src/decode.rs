//! Turning the output symbols of an accepted path into a structured intent
//!
//! The decoder is a single pass over the path with a stack of open scopes.
//! Entity offsets are token indices with an exclusive end; `start`/`end`
//! index `tokens`, `raw_start`/`raw_end` index `raw_tokens`.

use crate::error::{GrammarError, Result};
use crate::symbols::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity: String,
    pub value: String,
    pub raw_value: String,
    pub start: usize,
    pub end: usize,
    pub raw_start: usize,
    pub raw_end: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IntentName {
    pub name: Option<String>,
    pub confidence: f32,
}

/// A decoded intent
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Intent {
    /// Reported words joined by spaces (substitutions applied)
    pub text: String,
    /// Words as they appeared in the matched input
    pub raw_text: String,
    pub tokens: Vec<String>,
    pub raw_tokens: Vec<String>,
    pub intent: IntentName,
    pub entities: Vec<Entity>,
}

impl Intent {
    /// The "no match" result: no name, no entities, confidence 0
    pub fn empty() -> Self {
        Self::default()
    }

    /// No match that still echoes the input it was given
    pub fn no_match(tokens: &[String]) -> Self {
        let text = tokens.join(" ");
        Self {
            raw_text: text.clone(),
            text,
            tokens: tokens.to_vec(),
            raw_tokens: tokens.to_vec(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.intent.name.is_none()
    }

    /// Entity values keyed by entity name; later entities win
    pub fn slots(&self) -> BTreeMap<String, String> {
        self.entities
            .iter()
            .map(|e| (e.entity.clone(), e.value.clone()))
            .collect()
    }
}

/// How much of the input the fuzzy recognizer used
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MatchDiagnostics {
    pub total_tokens: usize,
    pub matched_tokens: usize,
    pub skipped_tokens: usize,
    pub skipped_stop_words: usize,
}

/// Recognizer output record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    #[serde(flatten)]
    pub intent: Intent,
    pub slots: BTreeMap<String, String>,
    pub recognize_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<MatchDiagnostics>,
}

impl Recognition {
    pub fn new(intent: Intent, recognize_seconds: f64) -> Self {
        Self {
            slots: intent.slots(),
            intent,
            recognize_seconds,
            diagnostics: None,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: MatchDiagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn is_match(&self) -> bool {
        !self.intent.is_empty()
    }
}

enum Scope {
    Intent,
    Entity {
        order: usize,
        slot: String,
        value: Option<String>,
        start: usize,
        raw_start: usize,
    },
}

/// Decode one path's output symbols.
///
/// Fails with `MalformedPath` when markers are unbalanced or misnested, or
/// when more than one intent scope appears.
pub fn decode_symbols<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> Result<Intent> {
    let mut intent = Intent::empty();
    let mut stack: Vec<Scope> = Vec::new();
    let mut entities: Vec<(usize, Entity)> = Vec::new();
    let mut opened = 0usize;

    for symbol in symbols {
        match symbol {
            Symbol::Word(word) => {
                intent.tokens.push(word.clone());
                intent.raw_tokens.push(word.clone());
            }
            Symbol::Substitution { raw, value } => {
                intent
                    .tokens
                    .extend(value.split_whitespace().map(str::to_string));
                intent
                    .raw_tokens
                    .extend(raw.split_whitespace().map(str::to_string));
            }
            Symbol::IntentOpen(name) => {
                if !stack.is_empty() || intent.intent.name.is_some() {
                    return Err(GrammarError::MalformedPath(format!(
                        "intent {name} opened inside another scope"
                    )));
                }
                intent.intent.name = Some(name.clone());
                stack.push(Scope::Intent);
            }
            Symbol::IntentClose => match stack.pop() {
                Some(Scope::Intent) => {}
                _ => {
                    return Err(GrammarError::MalformedPath(
                        "intent closed without a matching open".to_string(),
                    ))
                }
            },
            Symbol::EntityOpen { slot, value } => {
                stack.push(Scope::Entity {
                    order: opened,
                    slot: slot.clone(),
                    value: value.clone(),
                    start: intent.tokens.len(),
                    raw_start: intent.raw_tokens.len(),
                });
                opened += 1;
            }
            Symbol::EntityClose => match stack.pop() {
                Some(Scope::Entity {
                    order,
                    slot,
                    value,
                    start,
                    raw_start,
                }) => {
                    let valued = value.is_some();
                    if let Some(value) = value {
                        // Explicit tag values replace the tagged words
                        intent.tokens.truncate(start);
                        intent
                            .tokens
                            .extend(value.split_whitespace().map(str::to_string));
                    }
                    let end = intent.tokens.len();
                    if valued {
                        // Entities closed inside now cover the replacement
                        for (_, inner) in entities.iter_mut().filter(|(o, _)| *o > order) {
                            inner.start = start;
                            inner.end = end;
                        }
                    }
                    let raw_end = intent.raw_tokens.len();
                    entities.push((
                        order,
                        Entity {
                            entity: slot,
                            value: intent.tokens[start..end].join(" "),
                            raw_value: intent.raw_tokens[raw_start..raw_end].join(" "),
                            start,
                            end,
                            raw_start,
                            raw_end,
                        },
                    ));
                }
                _ => {
                    return Err(GrammarError::MalformedPath(
                        "entity closed without a matching open".to_string(),
                    ))
                }
            },
        }
    }

    if !stack.is_empty() {
        return Err(GrammarError::MalformedPath(format!(
            "{} scope(s) left open",
            stack.len()
        )));
    }

    entities.sort_by_key(|(order, _)| *order);
    intent.entities = entities.into_iter().map(|(_, e)| e).collect();
    intent.text = intent.tokens.join(" ");
    intent.raw_text = intent.raw_tokens.join(" ");
    if intent.intent.name.is_some() {
        intent.intent.confidence = 1.0;
    }
    Ok(intent)
}
