//! intent-grammar: sentence templates compiled into intent recognizers
//!
//! Templates grouped by intent are parsed, ordered by their rule and slot
//! dependencies, and compiled into weighted finite-state transducers. The
//! per-intent automata are merged into one recognizer whose output carries
//! intent and entity markers; decoding a matched path yields the intent, its
//! entities and their values.

mod error;
pub use error::{GrammarError, Result};

mod symbols;
pub use symbols::{Symbol, MARKER_PREFIX, SUBSTITUTION_SEPARATOR};

mod template;
pub use template::{parse_template, Reference, RuleName, Tag, Template};

mod ini;
pub use ini::{load_ini, parse_ini, Grammar};

mod slots;
pub use slots::{load_slots_dir, Slots};

mod deps;
pub use deps::{DependencyGraph, DependencyNode, NodeKind};

pub mod fst;
pub use fst::{Arc, Automaton, StateId};

mod store;
pub use store::{read_automaton, ArtifactStore, MERGED_FILE};

mod config;
pub use config::{load_word_set, Profile, RecognitionConfig, TrainingConfig, WordCasing};

mod compile;
pub use compile::{compile_grammars, merge_intents, CompiledGrammar, GrammarCompiler};

mod decode;
pub use decode::{decode_symbols, Entity, Intent, IntentName, MatchDiagnostics, Recognition};

mod traits;
pub use traits::Recognizer;

mod strict;
pub use strict::StrictRecognizer;

mod fuzzy;
pub use fuzzy::FuzzyRecognizer;

/// Labeled example generation
pub mod generate;
pub use generate::{Example, ExampleGenerator};
