//! Build-order resolution for rules, slots and intents

use crate::error::{GrammarError, Result};
use crate::ini::Grammar;
use crate::template::{Reference, Template};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Something that gets compiled into its own automaton
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyNode {
    /// A slot's value list, by slot name
    Slot(String),
    /// A rule, by qualified `Intent.rule` name
    Rule(String),
    /// An intent's sentences
    Intent(String),
}

/// How a node relates to the intent being built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Intent,
    LocalRule,
    RemoteRule,
    Slot,
}

impl DependencyNode {
    pub fn kind(&self, intent: &str) -> NodeKind {
        match self {
            DependencyNode::Slot(_) => NodeKind::Slot,
            DependencyNode::Intent(_) => NodeKind::Intent,
            DependencyNode::Rule(qualified) => {
                let local = qualified
                    .split_once('.')
                    .map_or(false, |(owner, _)| owner == intent);
                if local {
                    NodeKind::LocalRule
                } else {
                    NodeKind::RemoteRule
                }
            }
        }
    }

    /// Name used for compiled artifacts (`$room`, `Intent.rule`, `Intent`)
    pub fn artifact_name(&self) -> String {
        match self {
            DependencyNode::Slot(name) => format!("${name}"),
            DependencyNode::Rule(qualified) => qualified.clone(),
            DependencyNode::Intent(name) => name.clone(),
        }
    }

    fn for_reference(reference: &Reference, intent: &str) -> Self {
        match reference {
            Reference::Rule(name) => DependencyNode::Rule(name.qualified(intent)),
            Reference::Slot(name) => DependencyNode::Slot(name.clone()),
        }
    }
}

impl fmt::Display for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyNode::Slot(name) => write!(f, "${name}"),
            DependencyNode::Rule(qualified) => write!(f, "<{qualified}>"),
            DependencyNode::Intent(name) => write!(f, "[{name}]"),
        }
    }
}

/// Directed graph where an edge `a -> b` means `a` is needed to build `b`
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<DependencyNode, ()>,
    index: HashMap<DependencyNode, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, node: DependencyNode) -> NodeIndex {
        if let Some(&idx) = self.index.get(&node) {
            return idx;
        }
        let idx = self.graph.add_node(node.clone());
        self.index.insert(node, idx);
        idx
    }

    /// Record that `needed` must be built before `dependent`
    pub fn add_dependency(&mut self, needed: DependencyNode, dependent: DependencyNode) {
        let from = self.node(needed);
        let to = self.node(dependent);
        self.graph.update_edge(from, to, ());
    }

    /// Dependencies of a single intent: its local rules plus whatever they and
    /// the sentences reference. Remote rules and slots are leaves.
    pub fn for_grammar(grammar: &Grammar) -> Self {
        let mut deps = Self::new();
        let intent = &grammar.intent;
        let target = DependencyNode::Intent(intent.clone());
        deps.node(target.clone());

        for reference in grammar.sentences.iter().flat_map(Template::references) {
            deps.add_dependency(DependencyNode::for_reference(&reference, intent), target.clone());
        }
        for (rule, body) in &grammar.rules {
            let rule_node = DependencyNode::Rule(format!("{intent}.{rule}"));
            deps.node(rule_node.clone());
            for reference in body.references() {
                deps.add_dependency(
                    DependencyNode::for_reference(&reference, intent),
                    rule_node.clone(),
                );
            }
        }
        deps
    }

    /// Dependencies of a whole compilation run. Every reference must name a
    /// defined rule or a known slot.
    pub fn for_grammars(grammars: &[Grammar], slot_names: &BTreeSet<String>) -> Result<Self> {
        let defined: BTreeSet<String> = grammars
            .iter()
            .flat_map(|g| g.rules.keys().map(move |rule| format!("{}.{}", g.intent, rule)))
            .collect();

        let check = |reference: &Reference, intent: &str| -> Result<DependencyNode> {
            let known = match reference {
                Reference::Rule(name) => defined.contains(&name.qualified(intent)),
                Reference::Slot(name) => slot_names.contains(name),
            };
            if known {
                Ok(DependencyNode::for_reference(reference, intent))
            } else {
                Err(GrammarError::UnresolvedReference {
                    reference: reference.to_string(),
                    intent: intent.to_string(),
                })
            }
        };

        let mut deps = Self::new();
        for grammar in grammars {
            let intent = &grammar.intent;
            let target = DependencyNode::Intent(intent.clone());
            deps.node(target.clone());

            for (rule, body) in &grammar.rules {
                let rule_node = DependencyNode::Rule(format!("{intent}.{rule}"));
                deps.node(rule_node.clone());
                for reference in body.references() {
                    deps.add_dependency(check(&reference, intent)?, rule_node.clone());
                }
            }
            for reference in grammar.sentences.iter().flat_map(Template::references) {
                deps.add_dependency(check(&reference, intent)?, target.clone());
            }
        }

        Ok(deps)
    }

    pub fn contains(&self, node: &DependencyNode) -> bool {
        self.index.contains_key(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.graph.node_weights()
    }

    /// Nodes that must be built before `node`
    pub fn dependencies_of(&self, node: &DependencyNode) -> Vec<&DependencyNode> {
        let Some(&idx) = self.index.get(node) else {
            return Vec::new();
        };
        let mut needed: Vec<&DependencyNode> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| &self.graph[n])
            .collect();
        needed.sort();
        needed
    }

    /// Order in which nodes can be built so every dependency comes first
    pub fn build_order(&self) -> Result<Vec<DependencyNode>> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order.into_iter().map(|idx| self.graph[idx].clone()).collect()),
            Err(cycle) => {
                let culprit = cycle.node_id();
                let component = tarjan_scc(&self.graph)
                    .into_iter()
                    .find(|scc| scc.contains(&culprit))
                    .unwrap_or_else(|| vec![culprit]);
                let mut names: Vec<String> = component
                    .into_iter()
                    .map(|idx| self.graph[idx].to_string())
                    .collect();
                names.sort();
                Err(GrammarError::CyclicDependency { cycle: names })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ini::parse_ini;

    fn slots(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dependencies_come_first() {
        let grammars = parse_ini(
            "[SetLight]\nstate = (on | off){state}\nturn <state> the $room light\n\
             [Dim]\ndim the $room <SetLight.state>\n",
            None,
        )
        .unwrap();
        let deps = DependencyGraph::for_grammars(&grammars, &slots(&["room"])).unwrap();
        assert!(deps.contains(&DependencyNode::Intent("Dim".into())));
        assert_eq!(deps.nodes().count(), 4);
        let order = deps.build_order().unwrap();

        let pos = |node: DependencyNode| order.iter().position(|n| *n == node).unwrap();
        let state = pos(DependencyNode::Rule("SetLight.state".into()));
        let room = pos(DependencyNode::Slot("room".into()));
        assert!(state < pos(DependencyNode::Intent("SetLight".into())));
        assert!(room < pos(DependencyNode::Intent("SetLight".into())));
        assert!(state < pos(DependencyNode::Intent("Dim".into())));
        assert!(room < pos(DependencyNode::Intent("Dim".into())));
    }

    #[test]
    fn test_per_intent_kinds() {
        let grammars =
            parse_ini("[Dim]\nlevel = (low | high)\ndim <level> <Other.x> $room\n", None).unwrap();
        let deps = DependencyGraph::for_grammar(&grammars[0]);
        let kinds: Vec<(String, NodeKind)> = deps
            .dependencies_of(&DependencyNode::Intent("Dim".into()))
            .into_iter()
            .map(|n| (n.to_string(), n.kind("Dim")))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("$room".to_string(), NodeKind::Slot),
                ("<Dim.level>".to_string(), NodeKind::LocalRule),
                ("<Other.x>".to_string(), NodeKind::RemoteRule),
            ]
        );
    }

    #[test]
    fn test_cycle_names_both_rules() {
        let grammars = parse_ini("[Loop]\na = x <b>\nb = y <a>\nstart <a>\n", None).unwrap();
        let deps = DependencyGraph::for_grammars(&grammars, &BTreeSet::new()).unwrap();
        match deps.build_order() {
            Err(GrammarError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec!["<Loop.a>".to_string(), "<Loop.b>".to_string()]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let grammars = parse_ini("[Loop]\na = x [<a>]\n<a>\n", None).unwrap();
        let deps = DependencyGraph::for_grammars(&grammars, &BTreeSet::new()).unwrap();
        assert!(matches!(
            deps.build_order(),
            Err(GrammarError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_unresolved_references() {
        let grammars = parse_ini("[Lights]\nturn on <missing>\n", None).unwrap();
        match DependencyGraph::for_grammars(&grammars, &BTreeSet::new()) {
            Err(GrammarError::UnresolvedReference { reference, intent }) => {
                assert_eq!(reference, "<missing>");
                assert_eq!(intent, "Lights");
            }
            other => panic!("expected unresolved reference, got {other:?}"),
        }

        let grammars = parse_ini("[Lights]\nturn on the $room light\n", None).unwrap();
        assert!(matches!(
            DependencyGraph::for_grammars(&grammars, &BTreeSet::new()),
            Err(GrammarError::UnresolvedReference { .. })
        ));
    }
}
