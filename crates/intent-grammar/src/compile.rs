//! Template-to-automaton compilation and intent merging

use crate::config::WordCasing;
use crate::deps::{DependencyGraph, DependencyNode};
use crate::error::{GrammarError, Result};
use crate::fst::Automaton;
use crate::ini::Grammar;
use crate::slots::Slots;
use crate::store::ArtifactStore;
use crate::symbols::Symbol;
use crate::template::{Tag, Template};
use std::collections::HashMap;
use tracing::{debug, info};

/// Output of a compilation run
#[derive(Debug, Clone)]
pub struct CompiledGrammar {
    /// Per-intent automata in grammar order (no intent markers)
    pub intents: Vec<(String, Automaton)>,
    /// Union of all intents, each wrapped in intent markers
    pub merged: Automaton,
}

/// Compiles grammars in dependency order, keeping every built automaton
#[derive(Debug, Default)]
pub struct GrammarCompiler {
    casing: WordCasing,
    store: Option<ArtifactStore>,
    built: HashMap<DependencyNode, Automaton>,
}

impl GrammarCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write every artifact to `store` and read missing dependencies from it
    pub fn with_store(mut self, store: ArtifactStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Case transform applied to template words before compiling
    pub fn with_casing(mut self, casing: WordCasing) -> Self {
        self.casing = casing;
        self
    }

    /// Compile all grammars and merge them into one recognizer automaton.
    ///
    /// Nothing is merged (or written as the merged artifact) unless every
    /// intent compiles.
    pub fn compile(&mut self, grammars: &[Grammar], slots: &Slots) -> Result<CompiledGrammar> {
        if let Some(store) = &self.store {
            store.remove_merged()?;
        }
        self.built.clear();

        let mut grammars = grammars.to_vec();
        let mut slots = slots.clone();
        if self.casing != WordCasing::Ignore {
            let casing = self.casing;
            for grammar in &mut grammars {
                grammar.map_words(&|w| casing.apply(w));
            }
            slots.map_words(&|w| casing.apply(w));
        }

        let deps = DependencyGraph::for_grammars(&grammars, &slots.names())?;
        let by_intent: HashMap<&str, &Grammar> =
            grammars.iter().map(|g| (g.intent.as_str(), g)).collect();

        for node in deps.build_order()? {
            let fst = match &node {
                DependencyNode::Slot(name) => self.compile_slot(name, &slots)?,
                DependencyNode::Rule(qualified) => {
                    let (owner, rule) = qualified
                        .split_once('.')
                        .ok_or_else(|| GrammarError::MissingArtifact(qualified.clone()))?;
                    let body = by_intent
                        .get(owner)
                        .and_then(|g| g.rules.get(rule))
                        .ok_or_else(|| GrammarError::MissingArtifact(qualified.clone()))?;
                    self.compile_template(body, owner)?
                }
                DependencyNode::Intent(name) => {
                    let grammar = by_intent
                        .get(name.as_str())
                        .ok_or_else(|| GrammarError::MissingArtifact(name.clone()))?;
                    self.compile_template(&grammar.template(), name)?
                }
            };

            debug!(
                "Built {} ({} states, {} arcs)",
                node,
                fst.num_states(),
                fst.num_arcs()
            );
            if let Some(store) = &self.store {
                store.write(&node.artifact_name(), &fst)?;
            }
            self.built.insert(node, fst);
        }

        let intents: Vec<(String, Automaton)> = grammars
            .iter()
            .map(|g| {
                let fst = self.resolve(&DependencyNode::Intent(g.intent.clone()))?;
                Ok((g.intent.clone(), fst))
            })
            .collect::<Result<_>>()?;

        let merged = merge_intents(&intents);
        info!(
            "Merged {} intent(s) into {} states, {} arcs",
            intents.len(),
            merged.num_states(),
            merged.num_arcs()
        );
        if let Some(store) = &self.store {
            store.write_merged(&merged)?;
        }

        Ok(CompiledGrammar { intents, merged })
    }

    /// Automaton for one slot: any of its values
    fn compile_slot(&self, name: &str, slots: &Slots) -> Result<Automaton> {
        let label = format!("${name}");
        let values = slots
            .get(name)
            .ok_or_else(|| GrammarError::MissingArtifact(label.clone()))?;
        let branches = values
            .iter()
            .map(|value| self.compile_template(value, &label))
            .collect::<Result<Vec<_>>>()?;
        Ok(Automaton::union(&branches))
    }

    /// Compile a template; rule references are resolved relative to `intent`.
    pub fn compile_template(&self, template: &Template, intent: &str) -> Result<Automaton> {
        match template {
            Template::Word { text, substitution } => Ok(compile_word(text, substitution.as_deref())),
            Template::Sequence(items) => {
                let mut fst = Automaton::epsilon();
                for item in items {
                    fst = fst.concat(&self.compile_template(item, intent)?);
                }
                Ok(fst)
            }
            Template::Alternation(branches) => {
                let compiled = branches
                    .iter()
                    .map(|b| self.compile_template(b, intent))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Automaton::union(&compiled))
            }
            Template::Optional(inner) => {
                Ok(Automaton::optional(&self.compile_template(inner, intent)?))
            }
            Template::RuleRef(name) => {
                self.resolve(&DependencyNode::Rule(name.qualified(intent)))
            }
            Template::SlotRef(name) => {
                let values = self.resolve(&DependencyNode::Slot(name.clone()))?;
                let implicit = Tag {
                    slot: name.clone(),
                    value: None,
                };
                Ok(tag(&values, &implicit))
            }
            Template::Tagged { inner, tag: t } => {
                // An explicit tag on a slot replaces the slot's implicit one
                let inner = match inner.as_ref() {
                    Template::SlotRef(name) => self.resolve(&DependencyNode::Slot(name.clone()))?,
                    other => self.compile_template(other, intent)?,
                };
                Ok(tag(&inner, t))
            }
            Template::Substitution { inner, value } => {
                let mut fst = self.compile_template(inner, intent)?;
                fst.map_outputs(&silence_words);
                Ok(fst.concat(&Automaton::word(
                    None,
                    Some(Symbol::substitution("", value.clone())),
                )))
            }
        }
    }

    /// Previously built automaton for `node`, from memory or the store
    fn resolve(&self, node: &DependencyNode) -> Result<Automaton> {
        if let Some(fst) = self.built.get(node) {
            return Ok(fst.clone());
        }
        let name = node.artifact_name();
        match &self.store {
            Some(store) if store.contains(&name) => store.read(&name),
            _ => Err(GrammarError::MissingArtifact(name)),
        }
    }
}

fn compile_word(text: &str, substitution: Option<&str>) -> Automaton {
    let ilabel = (!text.is_empty()).then(|| text.to_string());
    let olabel = match substitution {
        None => Symbol::word(text),
        Some(value) => Symbol::substitution(text, value),
    };
    Automaton::word(ilabel, Some(olabel))
}

fn tag(inner: &Automaton, tag: &Tag) -> Automaton {
    Automaton::wrap(
        inner,
        Symbol::entity(tag.slot.clone(), tag.value.clone()),
        Symbol::EntityClose,
    )
}

/// Keep the words as raw input but report nothing for them
fn silence_words(symbol: Option<Symbol>) -> Option<Symbol> {
    match symbol {
        Some(Symbol::Word(raw)) | Some(Symbol::Substitution { raw, .. }) => {
            Some(Symbol::substitution(raw, ""))
        }
        other => other,
    }
}

/// Union of all intents, each wrapped in `IntentOpen(name)` / `IntentClose`
pub fn merge_intents(intents: &[(String, Automaton)]) -> Automaton {
    let wrapped: Vec<Automaton> = intents
        .iter()
        .map(|(name, fst)| {
            Automaton::wrap(fst, Symbol::IntentOpen(name.clone()), Symbol::IntentClose)
        })
        .collect();
    Automaton::union(&wrapped)
}

/// Compile without an artifact store
pub fn compile_grammars(grammars: &[Grammar], slots: &Slots) -> Result<CompiledGrammar> {
    GrammarCompiler::new().compile(grammars, slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ini::parse_ini;

    fn light_slots() -> Slots {
        let mut slots = Slots::new();
        slots.insert("room", &["kitchen", "hall"]).unwrap();
        slots
    }

    fn outputs_of_single_path(fst: &Automaton) -> Vec<Symbol> {
        let mut symbols = Vec::new();
        let mut state = fst.start();
        while let Some(arc) = fst.arcs(state).first() {
            if let Some(symbol) = &arc.olabel {
                symbols.push(symbol.clone());
            }
            state = arc.next;
        }
        symbols
    }

    #[test]
    fn test_slot_reference_is_implicitly_tagged() {
        let grammars = parse_ini("[SetLight]\nturn on the $room light\n", None).unwrap();
        let compiled = compile_grammars(&grammars, &light_slots()).unwrap();
        let symbols = outputs_of_single_path(&compiled.intents[0].1);
        assert!(symbols.contains(&Symbol::entity("room", None)));
        assert!(symbols.contains(&Symbol::EntityClose));
        assert!(symbols.contains(&Symbol::word("kitchen")));
    }

    #[test]
    fn test_explicit_tag_replaces_slot_tag() {
        let grammars = parse_ini("[SetLight]\nturn on the $room{place} light\n", None).unwrap();
        let compiled = compile_grammars(&grammars, &light_slots()).unwrap();
        let symbols = outputs_of_single_path(&compiled.intents[0].1);
        assert!(symbols.contains(&Symbol::entity("place", None)));
        assert!(!symbols.contains(&Symbol::entity("room", None)));
    }

    #[test]
    fn test_group_substitution_silences_inner_words() {
        let grammars = parse_ini("[Go]\n(living room):den\n", None).unwrap();
        let compiled = compile_grammars(&grammars, &Slots::new()).unwrap();
        let symbols = outputs_of_single_path(&compiled.intents[0].1);
        assert_eq!(
            symbols,
            vec![
                Symbol::substitution("living", ""),
                Symbol::substitution("room", ""),
                Symbol::substitution("", "den"),
            ]
        );
    }

    #[test]
    fn test_merged_starts_with_one_branch_per_intent() {
        let grammars =
            parse_ini("[GetTime]\nwhat time is it\n[SetLight]\nturn on the $room light\n", None)
                .unwrap();
        let compiled = compile_grammars(&grammars, &light_slots()).unwrap();
        let merged = &compiled.merged;
        let labels: Vec<Option<Symbol>> = merged
            .arcs(merged.start())
            .iter()
            .map(|arc| merged.arcs(arc.next)[0].olabel.clone())
            .collect();
        assert_eq!(
            labels,
            vec![
                Some(Symbol::IntentOpen("GetTime".into())),
                Some(Symbol::IntentOpen("SetLight".into())),
            ]
        );
    }

    #[test]
    fn test_casing_applies_to_templates_and_slots() {
        let grammars = parse_ini("[SetLight]\nTurn on the $room light\n", None).unwrap();
        let mut slots = Slots::new();
        slots.insert("room", &["Kitchen"]).unwrap();
        let compiled = GrammarCompiler::new()
            .with_casing(WordCasing::Upper)
            .compile(&grammars, &slots)
            .unwrap();
        let vocab = compiled.merged.input_vocabulary();
        assert!(vocab.contains("TURN"));
        assert!(vocab.contains("KITCHEN"));
        assert!(!vocab.contains("Turn"));
    }

    #[test]
    fn test_store_receives_every_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let grammars = parse_ini(
            "[SetLight]\nstate = (on | off){state}\nturn <state> the $room light\n",
            None,
        )
        .unwrap();
        let compiled = GrammarCompiler::new()
            .with_store(store.clone())
            .compile(&grammars, &light_slots())
            .unwrap();

        assert!(store.contains("$room"));
        assert!(store.contains("SetLight.state"));
        assert!(store.contains("SetLight"));
        assert_eq!(store.read_merged().unwrap(), compiled.merged);
    }

    #[test]
    fn test_failed_compile_leaves_no_merged_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        store.write_merged(&Automaton::epsilon()).unwrap();

        let grammars = parse_ini("[Loop]\na = <b>\nb = <a>\n<a>\n", None).unwrap();
        let err = GrammarCompiler::new()
            .with_store(store.clone())
            .compile(&grammars, &Slots::new())
            .unwrap_err();
        assert!(matches!(err, GrammarError::CyclicDependency { .. }));
        assert!(!store.merged_path().exists());
    }

    #[test]
    fn test_missing_dependency_is_reported() {
        let compiler = GrammarCompiler::new();
        let err = compiler
            .compile_template(&Template::SlotRef("room".into()), "SetLight")
            .unwrap_err();
        assert!(matches!(err, GrammarError::MissingArtifact(name) if name == "$room"));
    }
}
