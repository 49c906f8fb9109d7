//! Example sentences drawn from a compiled automaton
//!
//! Sampling walks from the start state choosing among arcs (and stopping, at
//! final states) with probability proportional to `exp(-weight)`. Only states
//! that can still reach a final state are considered, so every walk ends in
//! an accepted path. Enumeration lists every path in construction order.

use crate::decode::{decode_symbols, Intent};
use crate::error::{GrammarError, Result};
use crate::fst::{Automaton, StateId};
use crate::symbols::Symbol;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use tracing::debug;

/// Longest walk a sample may take before giving up
pub const MAX_PATH_ARCS: usize = 10_000;

/// Default limit for enumerating every path
pub const DEFAULT_MAX_PATHS: usize = 100_000;

/// One generated path and what it decodes to
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub symbols: Vec<Symbol>,
    pub intent: Intent,
}

impl Example {
    fn from_symbols(symbols: Vec<Symbol>) -> Result<Self> {
        let intent = decode_symbols(&symbols)?;
        Ok(Self { symbols, intent })
    }

    /// Output symbols in their textual form, space separated
    pub fn raw_symbols(&self) -> String {
        self.symbols
            .iter()
            .map(Symbol::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `BS words ES<TAB>O tags O<TAB>Intent` with `B-`/`I-` entity tags
    pub fn to_iob(&self) -> String {
        let tokens = &self.intent.tokens;
        let mut tags = vec!["O".to_string(); tokens.len()];
        for entity in &self.intent.entities {
            let Some(span) = tags.get_mut(entity.start..entity.end) else {
                continue;
            };
            for (offset, tag) in span.iter_mut().enumerate() {
                let prefix = if offset == 0 { "B" } else { "I" };
                *tag = format!("{prefix}-{}", entity.entity);
            }
        }
        format!(
            "BS {} ES\tO {} O\t{}",
            tokens.join(" "),
            tags.join(" "),
            self.intent.intent.name.as_deref().unwrap_or_default()
        )
    }
}

pub struct ExampleGenerator<'a> {
    fst: &'a Automaton,
    coaccessible: Vec<bool>,
}

impl<'a> ExampleGenerator<'a> {
    pub fn new(fst: &'a Automaton) -> Self {
        Self {
            fst,
            coaccessible: fst.coaccessible(),
        }
    }

    fn live(&self, state: StateId) -> bool {
        self.coaccessible[state.index()]
    }

    /// `count` random examples, or every example when `count` is zero
    pub fn generate(&self, count: usize, rng: &mut impl Rng) -> Result<Vec<Example>> {
        if count == 0 {
            self.enumerate(DEFAULT_MAX_PATHS)
        } else {
            self.sample(count, rng)
        }
    }

    pub fn sample(&self, count: usize, rng: &mut impl Rng) -> Result<Vec<Example>> {
        (0..count)
            .map(|_| Example::from_symbols(self.sample_path(rng)?))
            .collect()
    }

    fn sample_path(&self, rng: &mut impl Rng) -> Result<Vec<Symbol>> {
        let mut state = self.fst.start();
        if !self.live(state) {
            return Err(GrammarError::Exhaustion(
                "automaton accepts nothing".to_string(),
            ));
        }

        let mut symbols = Vec::new();
        for _ in 0..MAX_PATH_ARCS {
            let arcs: Vec<_> = self
                .fst
                .arcs(state)
                .iter()
                .filter(|arc| self.live(arc.next))
                .collect();

            // The last choice (if present) is stopping here
            let mut weights: Vec<f64> = arcs.iter().map(|a| (-f64::from(a.weight)).exp()).collect();
            if let Some(weight) = self.fst.final_weight(state) {
                weights.push((-f64::from(weight)).exp());
            }
            let choice = WeightedIndex::new(&weights)
                .map_err(|e| {
                    GrammarError::Exhaustion(format!("no choice at state {}: {e}", state.0))
                })?
                .sample(rng);

            let Some(arc) = arcs.get(choice) else {
                return Ok(symbols);
            };
            if let Some(symbol) = &arc.olabel {
                symbols.push(symbol.clone());
            }
            state = arc.next;
        }
        Err(GrammarError::Exhaustion(format!(
            "sampled path exceeded {MAX_PATH_ARCS} arcs"
        )))
    }

    /// Every accepted path in construction order.
    ///
    /// Fails when the automaton is cyclic or has more than `max_paths` paths.
    pub fn enumerate(&self, max_paths: usize) -> Result<Vec<Example>> {
        if !self.fst.is_acyclic() {
            return Err(GrammarError::Exhaustion(
                "cannot enumerate a cyclic automaton".to_string(),
            ));
        }

        let mut examples = Vec::new();
        let start = self.fst.start();
        if !self.live(start) {
            return Ok(examples);
        }

        // (state, next arc to try, symbol emitted on the way in)
        let mut stack: Vec<(StateId, usize, Option<Symbol>)> = vec![(start, 0, None)];
        if self.fst.is_final(start) {
            examples.push(Example::from_symbols(Vec::new())?);
        }
        while let Some(top) = stack.last_mut() {
            let (state, next_arc) = (top.0, top.1);
            let Some(arc) = self.fst.arcs(state).get(next_arc) else {
                stack.pop();
                continue;
            };
            top.1 += 1;
            if !self.live(arc.next) {
                continue;
            }
            stack.push((arc.next, 0, arc.olabel.clone()));
            if self.fst.is_final(arc.next) {
                if examples.len() == max_paths {
                    return Err(GrammarError::Exhaustion(format!(
                        "more than {max_paths} paths"
                    )));
                }
                let symbols = stack.iter().filter_map(|(_, _, s)| s.clone()).collect();
                examples.push(Example::from_symbols(symbols)?);
            }
        }
        debug!("Enumerated {} path(s)", examples.len());
        Ok(examples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile_grammars;
    use crate::fst::Arc;
    use crate::ini::parse_ini;
    use crate::slots::Slots;
    use crate::strict::StrictRecognizer;
    use crate::traits::Recognizer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn colors_fst() -> Automaton {
        let grammars = parse_ini("[Color]\nred\ngreen\nblue\n", None).unwrap();
        compile_grammars(&grammars, &Slots::new()).unwrap().merged
    }

    #[test]
    fn test_sampled_examples_are_valid_texts() {
        let fst = colors_fst();
        let generator = ExampleGenerator::new(&fst);
        let mut rng = StdRng::seed_from_u64(7);
        let examples = generator.generate(10, &mut rng).unwrap();
        assert_eq!(examples.len(), 10);
        for example in &examples {
            assert_eq!(example.intent.intent.name.as_deref(), Some("Color"));
            assert!(["red", "green", "blue"].contains(&example.intent.text.as_str()));
            assert_eq!(decode_symbols(&example.symbols).unwrap(), example.intent);
        }
    }

    #[test]
    fn test_same_seed_same_samples() {
        let fst = colors_fst();
        let generator = ExampleGenerator::new(&fst);
        let first = generator.sample(5, &mut StdRng::seed_from_u64(42)).unwrap();
        let second = generator.sample(5, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_enumerate_in_construction_order() {
        let fst = colors_fst();
        let examples = ExampleGenerator::new(&fst)
            .generate(0, &mut StdRng::seed_from_u64(0))
            .unwrap();
        let texts: Vec<&str> = examples.iter().map(|e| e.intent.text.as_str()).collect();
        assert_eq!(texts, vec!["red", "green", "blue"]);
    }

    #[test]
    fn test_enumeration_limits() {
        let fst = colors_fst();
        let err = ExampleGenerator::new(&fst).enumerate(2).unwrap_err();
        assert!(matches!(err, GrammarError::Exhaustion(_)));

        let mut looping = Automaton::word(Some("a".into()), Some(Symbol::word("a")));
        let end = looping.finals()[0];
        looping.add_arc(end, Arc::epsilon(looping.start()));
        let err = ExampleGenerator::new(&looping).enumerate(10).unwrap_err();
        assert!(matches!(err, GrammarError::Exhaustion(_)));
    }

    #[test]
    fn test_every_enumerated_path_is_recognized() {
        let grammars = parse_ini(
            "[SetLight]\nturn (on|off){state} [the] $room light\n[GetTime]\nwhat time is it\n",
            None,
        )
        .unwrap();
        let mut slots = Slots::new();
        slots.insert("room", &["kitchen", "living room"]).unwrap();
        let fst = compile_grammars(&grammars, &slots).unwrap().merged;
        let examples = ExampleGenerator::new(&fst).enumerate(100).unwrap();
        assert_eq!(examples.len(), 2 * 2 * 2 + 1);

        let recognizer = StrictRecognizer::new(fst.clone());
        for example in &examples {
            let result = recognizer.recognize(&example.intent.raw_tokens);
            assert_eq!(result.intent.intent.name, example.intent.intent.name);
            assert_eq!(result.intent.entities, example.intent.entities);
        }
    }

    #[test]
    fn test_markers_are_balanced_on_every_path() {
        let grammars = parse_ini(
            "[A]\nrule = (x | y){inner}\n(<rule> z){outer} [$s]\n[B]\nw\n",
            None,
        )
        .unwrap();
        let mut slots = Slots::new();
        slots.insert("s", &["p", "q"]).unwrap();
        let fst = compile_grammars(&grammars, &slots).unwrap().merged;
        for example in ExampleGenerator::new(&fst).enumerate(100).unwrap() {
            let mut depth = 0i32;
            let mut intents = 0;
            for symbol in &example.symbols {
                match symbol {
                    Symbol::IntentOpen(_) => {
                        assert_eq!(depth, 0);
                        intents += 1;
                        depth += 1;
                    }
                    Symbol::EntityOpen { .. } => depth += 1,
                    Symbol::IntentClose | Symbol::EntityClose => depth -= 1,
                    _ => {}
                }
                assert!(depth >= 0);
            }
            assert_eq!(depth, 0);
            assert_eq!(intents, 1);
        }
    }

    #[test]
    fn test_iob_with_valued_outer_tag() {
        let grammars = parse_ini("[A]\n((a b){inner} c){outer:X}\n", None).unwrap();
        let fst = compile_grammars(&grammars, &Slots::new()).unwrap().merged;
        let examples = ExampleGenerator::new(&fst).enumerate(10).unwrap();
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].intent.tokens, vec!["X".to_string()]);
        assert_eq!(examples[0].to_iob(), "BS X ES\tO B-inner O\tA");
    }

    #[test]
    fn test_iob_and_raw_symbols() {
        let grammars = parse_ini("[SetLight]\nturn on the $room light\n", None).unwrap();
        let mut slots = Slots::new();
        slots.insert("room", &["living room"]).unwrap();
        let fst = compile_grammars(&grammars, &slots).unwrap().merged;
        let examples = ExampleGenerator::new(&fst).enumerate(10).unwrap();
        assert_eq!(
            examples[0].to_iob(),
            "BS turn on the living room light ES\tO O O O B-room I-room O O\tSetLight"
        );
        assert_eq!(
            examples[0].raw_symbols(),
            "__intent__SetLight turn on the __begin__room living room __end__ light __end_intent__"
        );
    }
}
