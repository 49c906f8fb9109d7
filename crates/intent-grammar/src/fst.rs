//! Arena-backed weighted finite-state transducer
//!
//! States are indices into a vector and arcs store the index of their target,
//! so copying one automaton into another is a plain offset shift. Weights are
//! costs (lower is better); zero everywhere means every path is equally good.

use crate::error::{GrammarError, Result};
use crate::symbols::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub u32);

impl StateId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    fn offset(self, by: u32) -> Self {
        StateId(self.0 + by)
    }
}

/// A transition. `None` labels are epsilon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ilabel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub olabel: Option<Symbol>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub weight: f32,
    pub next: StateId,
}

fn is_zero(weight: &f32) -> bool {
    *weight == 0.0
}

impl Arc {
    pub fn epsilon(next: StateId) -> Self {
        Self {
            ilabel: None,
            olabel: None,
            weight: 0.0,
            next,
        }
    }

    /// Arc that consumes nothing and emits `symbol`
    pub fn output(symbol: Symbol, next: StateId) -> Self {
        Self {
            ilabel: None,
            olabel: Some(symbol),
            weight: 0.0,
            next,
        }
    }

    pub fn is_epsilon_input(&self) -> bool {
        self.ilabel.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct State {
    arcs: Vec<Arc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    final_weight: Option<f32>,
}

/// Weighted transducer with a single start state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Automaton {
    states: Vec<State>,
    start: StateId,
}

impl Default for Automaton {
    fn default() -> Self {
        Self::new()
    }
}

impl Automaton {
    /// Automaton with a lone start state; accepts nothing
    pub fn new() -> Self {
        Self {
            states: vec![State::default()],
            start: StateId(0),
        }
    }

    /// Accepts only the empty input
    pub fn epsilon() -> Self {
        let mut fst = Self::new();
        fst.set_final(fst.start, 0.0);
        fst
    }

    /// Accepts exactly one input word
    pub fn word(ilabel: Option<String>, olabel: Option<Symbol>) -> Self {
        let mut fst = Self::new();
        let end = fst.add_state();
        fst.add_arc(
            fst.start,
            Arc {
                ilabel,
                olabel,
                weight: 0.0,
                next: end,
            },
        );
        fst.set_final(end, 0.0);
        fst
    }

    pub fn start(&self) -> StateId {
        self.start
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn num_arcs(&self) -> usize {
        self.states.iter().map(|s| s.arcs.len()).sum()
    }

    pub fn states(&self) -> impl Iterator<Item = StateId> {
        (0..self.states.len() as u32).map(StateId)
    }

    pub fn add_state(&mut self) -> StateId {
        self.states.push(State::default());
        StateId(self.states.len() as u32 - 1)
    }

    pub fn add_arc(&mut self, from: StateId, arc: Arc) {
        self.states[from.index()].arcs.push(arc);
    }

    /// Outgoing arcs in the order they were added
    pub fn arcs(&self, state: StateId) -> &[Arc] {
        &self.states[state.index()].arcs
    }

    pub fn arcs_mut(&mut self, state: StateId) -> &mut [Arc] {
        &mut self.states[state.index()].arcs
    }

    pub fn set_final(&mut self, state: StateId, weight: f32) {
        self.states[state.index()].final_weight = Some(weight);
    }

    pub fn clear_final(&mut self, state: StateId) {
        self.states[state.index()].final_weight = None;
    }

    pub fn final_weight(&self, state: StateId) -> Option<f32> {
        self.states[state.index()].final_weight
    }

    pub fn is_final(&self, state: StateId) -> bool {
        self.final_weight(state).is_some()
    }

    pub fn finals(&self) -> Vec<StateId> {
        self.states().filter(|&s| self.is_final(s)).collect()
    }

    /// Copy `other`'s states into this arena and return where its start landed.
    /// Final states keep their final weights.
    pub fn splice(&mut self, other: &Automaton) -> StateId {
        let shift = self.states.len() as u32;
        self.states.extend(other.states.iter().map(|state| State {
            arcs: state
                .arcs
                .iter()
                .map(|arc| Arc {
                    next: arc.next.offset(shift),
                    ..arc.clone()
                })
                .collect(),
            final_weight: state.final_weight,
        }));
        other.start.offset(shift)
    }

    /// Paths of `self` followed by paths of `next`
    pub fn concat(mut self, next: &Automaton) -> Automaton {
        let finals = self.finals();
        let next_start = self.splice(next);
        for state in finals {
            let weight = self.final_weight(state).unwrap_or(0.0);
            self.clear_final(state);
            self.add_arc(
                state,
                Arc {
                    weight,
                    ..Arc::epsilon(next_start)
                },
            );
        }
        self
    }

    /// Paths of any one branch. Branch order is kept as arc order.
    pub fn union(branches: &[Automaton]) -> Automaton {
        let mut fst = Self::new();
        let end = fst.add_state();
        for branch in branches {
            let first = fst.states.len();
            let branch_start = fst.splice(branch);
            fst.add_arc(fst.start, Arc::epsilon(branch_start));
            fst.join_finals(first, Arc::epsilon(end));
        }
        fst.set_final(end, 0.0);
        fst
    }

    /// The inner paths or nothing
    pub fn optional(inner: &Automaton) -> Automaton {
        Self::union(&[inner.clone(), Self::epsilon()])
    }

    /// Every path of `inner`, preceded by `open` and followed by `close` on
    /// epsilon-input arcs. Paths can only finish through `close`.
    pub fn wrap(inner: &Automaton, open: Symbol, close: Symbol) -> Automaton {
        let mut fst = Self::new();
        let end = fst.add_state();
        let inner_start = fst.splice(inner);
        fst.add_arc(fst.start, Arc::output(open, inner_start));
        fst.join_finals(2, Arc::output(close, end));
        fst.set_final(end, 0.0);
        fst
    }

    /// Turn every final state at index `first` or later into an arc built from
    /// `template`, carrying the final weight
    fn join_finals(&mut self, first: usize, template: Arc) {
        for idx in first..self.states.len() {
            if let Some(weight) = self.states[idx].final_weight.take() {
                self.states[idx].arcs.push(Arc {
                    weight,
                    ..template.clone()
                });
            }
        }
    }

    /// Apply `f` to every output label
    pub fn map_outputs(&mut self, f: &dyn Fn(Option<Symbol>) -> Option<Symbol>) {
        for state in &mut self.states {
            for arc in &mut state.arcs {
                arc.olabel = f(arc.olabel.take());
            }
        }
    }

    /// States reachable from `states` through epsilon-input arcs, including themselves
    pub fn epsilon_closure(&self, states: &[StateId]) -> BTreeSet<StateId> {
        let mut closure: BTreeSet<StateId> = states.iter().copied().collect();
        let mut stack: Vec<StateId> = states.to_vec();
        while let Some(state) = stack.pop() {
            for arc in self.arcs(state) {
                if arc.is_epsilon_input() && closure.insert(arc.next) {
                    stack.push(arc.next);
                }
            }
        }
        closure
    }

    /// States reachable from the start state
    pub fn accessible(&self) -> Vec<bool> {
        let mut seen = vec![false; self.states.len()];
        let mut stack = vec![self.start];
        seen[self.start.index()] = true;
        while let Some(state) = stack.pop() {
            for arc in self.arcs(state) {
                if !seen[arc.next.index()] {
                    seen[arc.next.index()] = true;
                    stack.push(arc.next);
                }
            }
        }
        seen
    }

    /// States from which some final state can be reached
    pub fn coaccessible(&self) -> Vec<bool> {
        let mut incoming: Vec<Vec<StateId>> = vec![Vec::new(); self.states.len()];
        for state in self.states() {
            for arc in self.arcs(state) {
                incoming[arc.next.index()].push(state);
            }
        }
        let mut seen = vec![false; self.states.len()];
        let mut stack = self.finals();
        for state in &stack {
            seen[state.index()] = true;
        }
        while let Some(state) = stack.pop() {
            for &prev in &incoming[state.index()] {
                if !seen[prev.index()] {
                    seen[prev.index()] = true;
                    stack.push(prev);
                }
            }
        }
        seen
    }

    /// True when no cycle is reachable from the start state
    pub fn is_acyclic(&self) -> bool {
        // 0 = unvisited, 1 = on stack, 2 = done
        let mut color = vec![0u8; self.states.len()];
        let mut stack: Vec<(StateId, usize)> = vec![(self.start, 0)];
        color[self.start.index()] = 1;
        while let Some((state, next_arc)) = stack.pop() {
            let arcs = self.arcs(state);
            if next_arc == arcs.len() {
                color[state.index()] = 2;
                continue;
            }
            stack.push((state, next_arc + 1));
            let target = arcs[next_arc].next;
            match color[target.index()] {
                0 => {
                    color[target.index()] = 1;
                    stack.push((target, 0));
                }
                1 => return false,
                _ => {}
            }
        }
        true
    }

    /// Input words on arcs reachable from the start state
    pub fn input_vocabulary(&self) -> BTreeSet<String> {
        let accessible = self.accessible();
        self.states()
            .filter(|s| accessible[s.index()])
            .flat_map(|s| self.arcs(s).iter())
            .filter_map(|arc| arc.ilabel.clone())
            .collect()
    }

    /// Serialize as JSON
    pub fn write_to(&self, writer: impl Write) -> Result<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Deserialize and check that every state reference is in range
    pub fn read_from(reader: impl Read) -> Result<Self> {
        let fst: Self = serde_json::from_reader(reader)?;
        fst.validate()?;
        Ok(fst)
    }

    fn validate(&self) -> Result<()> {
        let len = self.states.len();
        if self.start.index() >= len {
            return Err(GrammarError::Serialization(format!(
                "start state {} out of range ({len} states)",
                self.start.0
            )));
        }
        for (idx, state) in self.states.iter().enumerate() {
            if let Some(arc) = state.arcs.iter().find(|arc| arc.next.index() >= len) {
                return Err(GrammarError::Serialization(format!(
                    "arc from state {idx} targets missing state {}",
                    arc.next.0
                )));
            }
        }
        Ok(())
    }
}
