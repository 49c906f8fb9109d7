//! Exact recognition
//!
//! A depth-first simulation of the automaton over `(state, position)` pairs.
//! Arcs are tried in the order they were built, so the first accepting path
//! found is the same on every run.

use crate::decode::{decode_symbols, Intent, Recognition};
use crate::fst::{Automaton, StateId};
use crate::symbols::Symbol;
use crate::traits::{intent_allowed, Recognizer};
use std::collections::{BTreeSet, HashSet};
use std::time::Instant;
use tracing::{debug, error};

pub struct StrictRecognizer {
    fst: Automaton,
    vocabulary: BTreeSet<String>,
    drop_unknown: bool,
    intent_filter: Option<BTreeSet<String>>,
}

struct Frame {
    state: StateId,
    pos: usize,
    next_arc: usize,
    emitted: Option<Symbol>,
}

impl StrictRecognizer {
    pub fn new(fst: Automaton) -> Self {
        let vocabulary = fst.input_vocabulary();
        Self {
            fst,
            vocabulary,
            drop_unknown: false,
            intent_filter: None,
        }
    }

    /// Discard tokens the automaton can never consume before matching
    pub fn with_drop_unknown(mut self, drop_unknown: bool) -> Self {
        self.drop_unknown = drop_unknown;
        self
    }

    /// Only accept paths through these intents
    pub fn with_intent_filter(mut self, filter: Option<BTreeSet<String>>) -> Self {
        self.intent_filter = filter;
        self
    }

    /// Output symbols of the first path consuming all of `tokens`
    pub fn find_path(&self, tokens: &[String]) -> Option<Vec<Symbol>> {
        let end = tokens.len();
        let start = self.fst.start();
        if self.fst.is_final(start) && end == 0 {
            return Some(Vec::new());
        }

        let mut visited: HashSet<(StateId, usize)> = HashSet::new();
        visited.insert((start, 0));
        let mut stack = vec![Frame {
            state: start,
            pos: 0,
            next_arc: 0,
            emitted: None,
        }];

        while let Some(frame) = stack.last_mut() {
            let arcs = self.fst.arcs(frame.state);
            let Some(arc) = arcs.get(frame.next_arc) else {
                stack.pop();
                continue;
            };
            frame.next_arc += 1;
            let pos = frame.pos;

            if !intent_allowed(self.intent_filter.as_ref(), arc) {
                continue;
            }
            let next_pos = match &arc.ilabel {
                None => pos,
                Some(word) if tokens.get(pos) == Some(word) => pos + 1,
                Some(_) => continue,
            };
            if !visited.insert((arc.next, next_pos)) {
                continue;
            }

            stack.push(Frame {
                state: arc.next,
                pos: next_pos,
                next_arc: 0,
                emitted: arc.olabel.clone(),
            });
            if next_pos == end && self.fst.is_final(arc.next) {
                return Some(stack.iter().filter_map(|f| f.emitted.clone()).collect());
            }
        }
        None
    }
}

impl Recognizer for StrictRecognizer {
    fn recognize(&self, tokens: &[String]) -> Recognition {
        let started = Instant::now();
        let kept: Vec<String> = if self.drop_unknown {
            tokens
                .iter()
                .filter(|t| self.vocabulary.contains(t.as_str()))
                .cloned()
                .collect()
        } else {
            tokens.to_vec()
        };

        let intent = if kept.is_empty() {
            Intent::no_match(tokens)
        } else {
            match self.find_path(&kept) {
                Some(symbols) => match decode_symbols(&symbols) {
                    Ok(intent) => intent,
                    Err(e) => {
                        error!("Discarding accepted path: {}", e);
                        Intent::no_match(tokens)
                    }
                },
                None => {
                    debug!("No strict match for {:?}", kept);
                    Intent::no_match(tokens)
                }
            }
        };
        Recognition::new(intent, started.elapsed().as_secs_f64())
    }

    fn automaton(&self) -> &Automaton {
        &self.fst
    }
}
