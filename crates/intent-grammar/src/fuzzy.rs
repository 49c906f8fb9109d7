//! Fault-tolerant recognition
//!
//! The automaton is turned into a petgraph graph once. Each call first walks
//! forward to collect the `(position, state)` pairs some alignment of the
//! input can reach, then runs a dynamic program over just those pairs (and a
//! matched-anything flag) that finds the accepting path whose words match
//! input tokens in order while skipping the cheapest set of remaining tokens.
//!
//! Costs are in tenths of a token: skipping a stop word costs 1, skipping any
//! other token costs 10. Tokens outside the known set cannot be skipped unless
//! `skip_unknown` is on. Among equally cheap paths the one with fewer arcs
//! wins, then the one built first.

use crate::decode::{decode_symbols, Intent, MatchDiagnostics, Recognition};
use crate::error::{GrammarError, Result};
use crate::fst::{Arc, Automaton, StateId};
use crate::symbols::Symbol;
use crate::traits::{intent_allowed, Recognizer};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, error};

const STOP_WORD_COST: u32 = 1;
const SKIP_COST: u32 = 10;

/// Transition as stored on a graph edge
#[derive(Debug, Clone)]
struct Transition {
    arc: Arc,
    /// Position among the source state's arcs
    order: usize,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Stop,
    Edge { edge: EdgeIndex, next_pos: usize },
}

#[derive(Debug, Clone, Copy)]
struct Best {
    cost: u32,
    len: u32,
    step: Step,
}

/// Best continuations from one node, indexed by the matched-anything flag
type Entry = [Option<Best>; 2];

fn lookup(
    table: &[HashMap<NodeIndex, Entry>],
    pos: usize,
    matched: bool,
    node: NodeIndex,
) -> Option<Best> {
    table[pos].get(&node).and_then(|entry| entry[usize::from(matched)])
}

/// Prefix sums of skip costs and of tokens that cannot be skipped
struct SkipCosts {
    cost_sum: Vec<u32>,
    barriers: Vec<usize>,
}

impl SkipCosts {
    /// Cost of skipping `tokens[from..to]`, or `None` across a barrier
    fn between(&self, from: usize, to: usize) -> Option<u32> {
        (self.barriers[to] == self.barriers[from])
            .then(|| self.cost_sum[to] - self.cost_sum[from])
    }
}

impl Best {
    fn beats(&self, other: &Option<Best>) -> bool {
        match other {
            None => true,
            Some(b) => (self.cost, self.len) < (b.cost, b.len),
        }
    }
}

pub struct FuzzyRecognizer {
    fst: Automaton,
    graph: DiGraph<StateId, Transition>,
    /// Outgoing edges of every node in construction order
    outgoing: Vec<Vec<EdgeIndex>>,
    /// Rank of every node in an order where epsilon edges only point forward
    epsilon_rank: Vec<usize>,
    stop_words: BTreeSet<String>,
    known_tokens: Option<BTreeSet<String>>,
    skip_unknown: bool,
    intent_filter: Option<BTreeSet<String>>,
}

impl FuzzyRecognizer {
    /// Build the match graph. Fails if the automaton has a cycle of epsilon arcs.
    pub fn new(fst: Automaton) -> Result<Self> {
        let mut graph: DiGraph<StateId, Transition> =
            DiGraph::with_capacity(fst.num_states(), fst.num_arcs());
        let nodes: Vec<NodeIndex> = fst.states().map(|s| graph.add_node(s)).collect();
        for state in fst.states() {
            for (order, arc) in fst.arcs(state).iter().enumerate() {
                graph.add_edge(
                    nodes[state.index()],
                    nodes[arc.next.index()],
                    Transition {
                        arc: arc.clone(),
                        order,
                    },
                );
            }
        }

        let outgoing: Vec<Vec<EdgeIndex>> = graph
            .node_indices()
            .map(|node| {
                let mut edges: Vec<(usize, EdgeIndex)> = graph
                    .edges(node)
                    .map(|e| (e.weight().order, e.id()))
                    .collect();
                edges.sort_by_key(|(order, _)| *order);
                edges.into_iter().map(|(_, id)| id).collect()
            })
            .collect();

        let epsilon_only = graph.filter_map(
            |_, _| Some(()),
            |_, t| t.arc.is_epsilon_input().then_some(()),
        );
        let epsilon_order = toposort(&epsilon_only, None).map_err(|cycle| {
            GrammarError::MalformedPath(format!(
                "epsilon cycle through state {}",
                cycle.node_id().index()
            ))
        })?;
        let mut epsilon_rank = vec![0; graph.node_count()];
        for (rank, node) in epsilon_order.iter().enumerate() {
            epsilon_rank[node.index()] = rank;
        }

        debug!(
            "Fuzzy graph with {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(Self {
            fst,
            graph,
            outgoing,
            epsilon_rank,
            stop_words: BTreeSet::new(),
            known_tokens: None,
            skip_unknown: true,
            intent_filter: None,
        })
    }

    /// Tokens that may be skipped cheaply
    pub fn with_stop_words(mut self, stop_words: BTreeSet<String>) -> Self {
        self.stop_words = stop_words;
        self
    }

    /// Tokens considered known; everything is known when `None`
    pub fn with_known_tokens(mut self, known: Option<BTreeSet<String>>) -> Self {
        self.known_tokens = known;
        self
    }

    pub fn with_skip_unknown(mut self, skip_unknown: bool) -> Self {
        self.skip_unknown = skip_unknown;
        self
    }

    pub fn with_intent_filter(mut self, filter: Option<BTreeSet<String>>) -> Self {
        self.intent_filter = filter;
        self
    }

    fn skip_cost(&self, token: &str) -> Option<u32> {
        if self.stop_words.contains(token) {
            return Some(STOP_WORD_COST);
        }
        let known = self
            .known_tokens
            .as_ref()
            .map_or(true, |known| known.contains(token));
        (known || self.skip_unknown).then_some(SKIP_COST)
    }

    fn skip_costs(&self, tokens: &[String]) -> SkipCosts {
        let mut cost_sum = vec![0u32; tokens.len() + 1];
        let mut barriers = vec![0usize; tokens.len() + 1];
        for (i, token) in tokens.iter().enumerate() {
            let cost = self.skip_cost(token);
            cost_sum[i + 1] = cost_sum[i] + cost.unwrap_or(0);
            barriers[i + 1] = barriers[i] + usize::from(cost.is_none());
        }
        SkipCosts { cost_sum, barriers }
    }

    /// Nodes some alignment of `tokens` can be at for each position, latest
    /// epsilon rank first
    fn reachable(&self, tokens: &[String], skip: &SkipCosts) -> Vec<Vec<NodeIndex>> {
        let n = tokens.len();
        let mut entered: Vec<HashSet<NodeIndex>> = vec![HashSet::new(); n + 1];
        entered[0].insert(NodeIndex::new(self.fst.start().index()));

        let mut layers = Vec::with_capacity(n + 1);
        for pos in 0..=n {
            let mut seen = std::mem::take(&mut entered[pos]);
            let mut stack: Vec<NodeIndex> = seen.iter().copied().collect();
            while let Some(node) = stack.pop() {
                for &edge in &self.outgoing[node.index()] {
                    let arc = &self.graph[edge].arc;
                    if !intent_allowed(self.intent_filter.as_ref(), arc) {
                        continue;
                    }
                    let Some((_, target)) = self.graph.edge_endpoints(edge) else {
                        continue;
                    };
                    match &arc.ilabel {
                        None => {
                            if seen.insert(target) {
                                stack.push(target);
                            }
                        }
                        Some(word) => {
                            for j in pos..n {
                                if skip.between(pos, j).is_none() {
                                    break;
                                }
                                if tokens[j] == *word {
                                    entered[j + 1].insert(target);
                                }
                            }
                        }
                    }
                }
            }
            let mut layer: Vec<NodeIndex> = seen.into_iter().collect();
            layer.sort_by_key(|node| Reverse(self.epsilon_rank[node.index()]));
            layers.push(layer);
        }
        layers
    }

    /// Best path for `tokens`: its output symbols, cost and matched positions
    fn best_path(&self, tokens: &[String]) -> Option<(Vec<Symbol>, u32, Vec<bool>)> {
        let n = tokens.len();
        let skip = self.skip_costs(tokens);
        let layers = self.reachable(tokens, &skip);

        let mut table: Vec<HashMap<NodeIndex, Entry>> = vec![HashMap::new(); n + 1];
        for pos in (0..=n).rev() {
            for &node in &layers[pos] {
                let mut entry: Entry = [None, None];
                for matched in [false, true] {
                    let mut best: Option<Best> = None;
                    if matched && self.fst.is_final(self.graph[node]) {
                        if let Some(cost) = skip.between(pos, n) {
                            best = Some(Best {
                                cost,
                                len: 0,
                                step: Step::Stop,
                            });
                        }
                    }

                    for &edge in &self.outgoing[node.index()] {
                        let transition = &self.graph[edge];
                        if !intent_allowed(self.intent_filter.as_ref(), &transition.arc) {
                            continue;
                        }
                        let Some((_, target)) = self.graph.edge_endpoints(edge) else {
                            continue;
                        };

                        match &transition.arc.ilabel {
                            None => {
                                if let Some(next) = lookup(&table, pos, matched, target) {
                                    let candidate = Best {
                                        cost: next.cost,
                                        len: next.len + 1,
                                        step: Step::Edge {
                                            edge,
                                            next_pos: pos,
                                        },
                                    };
                                    if candidate.beats(&best) {
                                        best = Some(candidate);
                                    }
                                }
                            }
                            Some(word) => {
                                for j in pos..n {
                                    let Some(skipped) = skip.between(pos, j) else {
                                        break;
                                    };
                                    if tokens[j] != *word {
                                        continue;
                                    }
                                    if let Some(next) = lookup(&table, j + 1, true, target) {
                                        let candidate = Best {
                                            cost: skipped + next.cost,
                                            len: next.len + 1,
                                            step: Step::Edge {
                                                edge,
                                                next_pos: j + 1,
                                            },
                                        };
                                        if candidate.beats(&best) {
                                            best = Some(candidate);
                                        }
                                    }
                                }
                            }
                        }
                    }
                    entry[usize::from(matched)] = best;
                }
                table[pos].insert(node, entry);
            }
        }

        let start = NodeIndex::new(self.fst.start().index());
        let total = lookup(&table, 0, false, start)?.cost;

        let mut symbols = Vec::new();
        let mut used = vec![false; n];
        let (mut pos, mut matched, mut node) = (0usize, false, start);
        while let Some(best) = lookup(&table, pos, matched, node) {
            let Step::Edge { edge, next_pos } = best.step else {
                break;
            };
            let transition = &self.graph[edge];
            if let Some(symbol) = &transition.arc.olabel {
                symbols.push(symbol.clone());
            }
            if transition.arc.ilabel.is_some() {
                used[next_pos - 1] = true;
                matched = true;
            }
            pos = next_pos;
            node = self.graph.edge_endpoints(edge)?.1;
        }
        debug!(
            "Fuzzy table held {} entries",
            table.iter().map(HashMap::len).sum::<usize>()
        );
        Some((symbols, total, used))
    }

    /// Number of `(position, state)` pairs the search visits for `tokens`
    pub fn search_size(&self, tokens: &[String]) -> usize {
        let skip = self.skip_costs(tokens);
        self.reachable(tokens, &skip).iter().map(Vec::len).sum()
    }
}

impl Recognizer for FuzzyRecognizer {
    fn recognize(&self, tokens: &[String]) -> Recognition {
        let started = Instant::now();
        let total = tokens.len();
        let found = if tokens.is_empty() {
            None
        } else {
            self.best_path(tokens)
        };

        let (intent, used) = match found {
            Some((symbols, cost, used)) => match decode_symbols(&symbols) {
                Ok(mut intent) => {
                    let confidence = 1.0 - cost as f32 / (SKIP_COST as f32 * total as f32);
                    intent.intent.confidence = confidence.max(0.0);
                    (intent, used)
                }
                Err(e) => {
                    error!("Discarding best path: {}", e);
                    (Intent::no_match(tokens), vec![false; total])
                }
            },
            None => {
                debug!("No fuzzy match for {:?}", tokens);
                (Intent::no_match(tokens), vec![false; total])
            }
        };

        let matched_tokens = used.iter().filter(|&&u| u).count();
        let skipped_stop_words = tokens
            .iter()
            .zip(&used)
            .filter(|(token, &u)| !u && self.stop_words.contains(token.as_str()))
            .count();
        let diagnostics = MatchDiagnostics {
            total_tokens: total,
            matched_tokens,
            skipped_tokens: total - matched_tokens,
            skipped_stop_words,
        };
        Recognition::new(intent, started.elapsed().as_secs_f64()).with_diagnostics(diagnostics)
    }

    fn automaton(&self) -> &Automaton {
        &self.fst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile_grammars;
    use crate::ini::parse_ini;
    use crate::slots::Slots;
    use crate::strict::StrictRecognizer;

    fn light_fst() -> Automaton {
        let grammars = parse_ini(
            "[GetTime]\nwhat time is it\n\n[SetLight]\nturn (on|off){state} the $room light\n",
            None,
        )
        .unwrap();
        let mut slots = Slots::new();
        slots.insert("room", &["kitchen", "hall"]).unwrap();
        compile_grammars(&grammars, &slots).unwrap().merged
    }

    fn words(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|w| w.to_string()).collect()
    }

    fn entity_pairs(result: &Recognition) -> Vec<(String, String)> {
        result
            .intent
            .entities
            .iter()
            .map(|e| (e.entity.clone(), e.value.clone()))
            .collect()
    }

    #[test]
    fn test_exact_input_has_full_confidence() {
        let recognizer = FuzzyRecognizer::new(light_fst()).unwrap();
        let result = recognizer.recognize_text("turn on the kitchen light");
        assert_eq!(result.intent.intent.name.as_deref(), Some("SetLight"));
        assert_eq!(result.intent.intent.confidence, 1.0);
        let diagnostics = result.diagnostics.unwrap();
        assert_eq!(diagnostics.matched_tokens, 5);
        assert_eq!(diagnostics.skipped_tokens, 0);
    }

    #[test]
    fn test_stop_words_and_unknown_tokens_are_skipped() {
        let fst = light_fst();
        let exact = StrictRecognizer::new(fst.clone()).recognize_text("turn on the kitchen light");
        let known = Some(fst.input_vocabulary());
        let recognizer = FuzzyRecognizer::new(fst)
            .unwrap()
            .with_stop_words(words(&["uh", "please"]))
            .with_known_tokens(known)
            .with_skip_unknown(true);

        let result = recognizer.recognize_text("uh turn on the kitchen light please");
        assert_eq!(result.intent.intent.name, exact.intent.intent.name);
        assert_eq!(entity_pairs(&result), entity_pairs(&exact));
        assert!(result.intent.intent.confidence < 1.0);
        assert!(result.intent.intent.confidence > 0.9);
        let diagnostics = result.diagnostics.unwrap();
        assert_eq!(diagnostics.skipped_stop_words, 2);
        assert_eq!(diagnostics.skipped_tokens, 2);
    }

    #[test]
    fn test_unknown_tokens_block_without_skip_unknown() {
        let fst = light_fst();
        let known = Some(fst.input_vocabulary());
        let blocking = FuzzyRecognizer::new(fst.clone())
            .unwrap()
            .with_known_tokens(known.clone())
            .with_skip_unknown(false);
        let result = blocking.recognize_text("turn on the big kitchen light");
        assert!(!result.is_match());
        assert_eq!(result.intent.intent.confidence, 0.0);

        let skipping = FuzzyRecognizer::new(fst)
            .unwrap()
            .with_known_tokens(known)
            .with_skip_unknown(true);
        let result = skipping.recognize_text("turn on the big kitchen light");
        assert_eq!(result.intent.intent.name.as_deref(), Some("SetLight"));
        let expected = 1.0 - 10.0 / 60.0;
        assert!((result.intent.intent.confidence - expected).abs() < 1e-6);
    }

    #[test]
    fn test_partial_input_still_matches() {
        let recognizer = FuzzyRecognizer::new(light_fst()).unwrap();
        let result = recognizer.recognize_text("what time is it now");
        assert_eq!(result.intent.intent.name.as_deref(), Some("GetTime"));
        assert!(result.intent.intent.confidence < 1.0);
    }

    #[test]
    fn test_nothing_matched_is_the_empty_sentinel() {
        let recognizer = FuzzyRecognizer::new(light_fst())
            .unwrap()
            .with_stop_words(words(&["uh"]));
        let result = recognizer.recognize_text("uh banana");
        assert!(!result.is_match());
        assert_eq!(result.intent.intent.confidence, 0.0);
        assert!(result.intent.entities.is_empty());
        assert!(!recognizer.recognize(&[]).is_match());
    }

    #[test]
    fn test_stop_words_never_lower_confidence() {
        let fst = light_fst();
        let inputs = [
            "turn on the kitchen light please",
            "please turn off the hall light",
            "what time is it please",
            "turn on the kitchen light",
        ];
        let plain = FuzzyRecognizer::new(fst.clone()).unwrap();
        let with_stop = FuzzyRecognizer::new(fst)
            .unwrap()
            .with_stop_words(words(&["please", "the"]));
        for input in inputs {
            let before = plain.recognize_text(input);
            let after = with_stop.recognize_text(input);
            assert!(before.is_match());
            assert!(after.intent.intent.confidence >= before.intent.intent.confidence);
        }
    }

    #[test]
    fn test_repeated_calls_agree() {
        let grammars = parse_ini("[A]\nopen the door\n[B]\nopen the door\n", None).unwrap();
        let fst = compile_grammars(&grammars, &Slots::new()).unwrap().merged;
        let recognizer = FuzzyRecognizer::new(fst).unwrap();
        let first = recognizer.recognize_text("uh open the door");
        for _ in 0..5 {
            let again = recognizer.recognize_text("uh open the door");
            assert_eq!(again.intent, first.intent);
        }
        assert_eq!(first.intent.intent.name.as_deref(), Some("A"));
    }

    #[test]
    fn test_intent_filter() {
        let recognizer = FuzzyRecognizer::new(light_fst())
            .unwrap()
            .with_intent_filter(Some(words(&["GetTime"])));
        let result = recognizer.recognize_text("turn on the kitchen light");
        assert_ne!(result.intent.intent.name.as_deref(), Some("SetLight"));
    }

    #[test]
    fn test_epsilon_cycles_are_rejected() {
        let mut fst = Automaton::epsilon();
        let start = fst.start();
        fst.add_arc(start, Arc::epsilon(start));
        assert!(matches!(
            FuzzyRecognizer::new(fst),
            Err(GrammarError::MalformedPath(_))
        ));
    }

    #[test]
    fn test_search_visits_only_reachable_states() {
        let mut text = String::from("[GetTime]\nwhat time is it\n");
        for i in 0..50 {
            text.push_str(&format!("[Command{i}]\nrun task number {i} now please\n"));
        }
        let grammars = parse_ini(&text, None).unwrap();
        let fst = compile_grammars(&grammars, &Slots::new()).unwrap().merged;
        let states = fst.num_states();
        let recognizer = FuzzyRecognizer::new(fst).unwrap();

        let tokens: Vec<String> = ["what", "time", "is", "it"].map(String::from).to_vec();
        assert!(recognizer.search_size(&tokens) < states);
        let result = recognizer.recognize(&tokens);
        assert_eq!(result.intent.intent.name.as_deref(), Some("GetTime"));
        assert_eq!(result.intent.intent.confidence, 1.0);
    }
}
