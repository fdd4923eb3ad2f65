//! Forced assignments and signed equivalences between variables.
//!
//! A [`Knowledge`] base holds two kinds of facts:
//!
//! - **assignments** `x = true` / `x = false`,
//! - **rewrite rules** `x = y` or `x = ¬y`, stored as [`Equivalence`]s that
//!   always rewrite the larger variable into the smaller one.
//!
//! Rewrite rules form a single-hop forest: the target of a rule is never
//! itself rewritten, and an assigned variable never has a rule. A reverse
//! index (`sources`) maps each representative to the variables rewriting
//! into it, so that a new fact about a representative fans out in one step.
//!
//! Contradictions are never reported as errors. They set the terminal
//! [`is_unsat`][Knowledge::is_unsat] flag, which callers check after every
//! mutation.

use std::collections::{HashMap, HashSet};
use std::fmt;

use log::trace;

use crate::types::{Lit, Var};
use crate::utils::sorted_keys;

/// A signed equivalence `from = to` (or `from = ¬to` when `negated`).
///
/// The constructor canonicalises the direction so that `from > to`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Equivalence {
    pub from: Var,
    pub to: Var,
    pub negated: bool,
}

impl Equivalence {
    pub fn new(a: Var, b: Var, negated: bool) -> Self {
        if a >= b {
            Self { from: a, to: b, negated }
        } else {
            Self { from: b, to: a, negated }
        }
    }

    /// Value implied for the other side when one side takes `value`.
    pub fn transfer(&self, value: bool) -> bool {
        value != self.negated
    }
}

impl fmt::Display for Equivalence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}={}", self.from.id(), if self.negated { "!" } else { "" }, self.to.id())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Knowledge {
    is_sat: bool,
    is_unsat: bool,
    assigned: HashMap<Var, bool>,
    rewrites: HashMap<Var, Equivalence>,
    sources: HashMap<Var, Vec<Var>>,
}

impl Knowledge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Knowledge that is contradictory from the start.
    pub fn unsat() -> Self {
        Self {
            is_unsat: true,
            ..Self::default()
        }
    }

    pub fn is_sat(&self) -> bool {
        self.is_sat
    }
    pub fn is_unsat(&self) -> bool {
        self.is_unsat
    }
    pub fn mark_sat(&mut self) {
        self.is_sat = true;
    }
    pub fn mark_unsat(&mut self) {
        self.is_unsat = true;
    }

    /// No facts and no terminal flag.
    pub fn is_empty(&self) -> bool {
        !self.is_sat && !self.is_unsat && self.assigned.is_empty() && self.rewrites.is_empty()
    }

    /// Number of facts (assignments plus rewrite rules).
    pub fn len(&self) -> usize {
        self.assigned.len() + self.rewrites.len()
    }

    pub fn assigned(&self) -> &HashMap<Var, bool> {
        &self.assigned
    }
    pub fn rewrites(&self) -> &HashMap<Var, Equivalence> {
        &self.rewrites
    }

    pub fn assignment(&self, var: Var) -> Option<bool> {
        self.assigned.get(&var).copied()
    }
    pub fn rewrite(&self, var: Var) -> Option<&Equivalence> {
        self.rewrites.get(&var)
    }

    /// Whether `var` is assigned or rewritten.
    pub fn constrains(&self, var: Var) -> bool {
        self.assigned.contains_key(&var) || self.rewrites.contains_key(&var)
    }

    /// Variables currently rewriting into the representative `var`.
    pub fn dependents(&self, var: Var) -> &[Var] {
        self.sources.get(&var).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Forced value of `var`, following its rewrite rule if it has one.
    pub fn value_of(&self, var: Var) -> Option<bool> {
        if let Some(&value) = self.assigned.get(&var) {
            return Some(value);
        }
        let rule = self.rewrites.get(&var)?;
        self.assigned.get(&rule.to).map(|&value| rule.transfer(value))
    }

    /// Whether a complete assignment is consistent with every fact.
    pub fn accepts(&self, assignment: &HashMap<Var, bool>) -> bool {
        if self.is_unsat {
            return false;
        }
        let assigned_ok = self
            .assigned
            .iter()
            .all(|(var, &value)| assignment.get(var).map_or(true, |&v| v == value));
        let rewrites_ok = self.rewrites.values().all(|rule| {
            match (assignment.get(&rule.from), assignment.get(&rule.to)) {
                (Some(&a), Some(&b)) => a == rule.transfer(b),
                _ => true,
            }
        });
        assigned_ok && rewrites_ok
    }

    /// Forces `var` to `value`.
    ///
    /// Returns the variables whose status changed. A conflicting assignment
    /// marks the knowledge unsatisfiable.
    pub fn assign(&mut self, var: Var, value: bool) -> HashSet<Var> {
        let mut updated = HashSet::new();
        let mut queue = vec![(var, value)];

        while let Some((var, value)) = queue.pop() {
            if self.is_unsat {
                break;
            }

            // Step forward to the representative.
            if let Some(rule) = self.rewrites.get(&var) {
                queue.push((rule.to, rule.transfer(value)));
                continue;
            }

            // Everything rewriting into `var` becomes assigned as well.
            if let Some(upstream) = self.sources.remove(&var) {
                for from in upstream {
                    if let Some(rule) = self.rewrites.remove(&from) {
                        queue.push((from, rule.transfer(value)));
                    }
                }
            }

            match self.assigned.get(&var) {
                Some(&previous) => {
                    if previous != value {
                        trace!("assign: {} = {} contradicts {} = {}", var, value, var, previous);
                        self.is_unsat = true;
                    }
                }
                None => {
                    self.assigned.insert(var, value);
                    updated.insert(var);
                }
            }
        }

        updated
    }

    /// Adds the rule `rule.from = rule.to` (negated when `rule.negated`).
    ///
    /// Returns the variables whose status changed.
    pub fn equate(&mut self, rule: Equivalence) -> HashSet<Var> {
        let mut rule = Equivalence::new(rule.from, rule.to, rule.negated);

        loop {
            if self.is_unsat {
                return HashSet::new();
            }

            if rule.from == rule.to {
                if rule.negated {
                    trace!("equate: {} is its own negation", rule.from);
                    self.is_unsat = true;
                }
                return HashSet::new();
            }

            // One side already assigned: forward to `assign`.
            if let Some(&value) = self.assigned.get(&rule.from) {
                return self.assign(rule.to, rule.transfer(value));
            }
            if let Some(&value) = self.assigned.get(&rule.to) {
                return self.assign(rule.from, rule.transfer(value));
            }

            // `from` already has a rule: combine both, the larger
            // representative is rewritten into the smaller one.
            if let Some(&overlap) = self.rewrites.get(&rule.from) {
                let negated = overlap.negated != rule.negated;
                if overlap.to == rule.to {
                    if negated {
                        trace!("equate: {} contradicts {}", rule, overlap);
                        self.is_unsat = true;
                    }
                    return HashSet::new();
                }
                rule = Equivalence::new(overlap.to, rule.to, negated);
                continue;
            }

            // `to` already has a rule: chain through it.
            if let Some(&overlap) = self.rewrites.get(&rule.to) {
                rule = Equivalence::new(rule.from, overlap.to, overlap.negated != rule.negated);
                continue;
            }

            break;
        }

        // Neither side constrained: record the rule and re-target everything
        // that currently rewrites into `from`.
        let mut updated = HashSet::new();
        if let Some(upstream) = self.sources.remove(&rule.from) {
            let targets = self.sources.entry(rule.to).or_default();
            for from in upstream {
                if let Some(up) = self.rewrites.get_mut(&from) {
                    up.to = rule.to;
                    up.negated ^= rule.negated;
                    targets.push(from);
                    updated.insert(from);
                }
            }
        }
        self.rewrites.insert(rule.from, rule);
        self.sources.entry(rule.to).or_default().push(rule.from);
        updated.insert(rule.from);
        updated
    }

    /// Applies every fact of `other` to `self`.
    pub fn merge_in(&mut self, other: &Knowledge) -> HashSet<Var> {
        self.is_sat |= other.is_sat;
        self.is_unsat |= other.is_unsat;

        let mut updated = HashSet::new();
        for var in sorted_keys(&other.assigned) {
            if self.is_unsat {
                return updated;
            }
            updated.extend(self.assign(var, other.assigned[&var]));
        }
        for var in sorted_keys(&other.rewrites) {
            if self.is_unsat {
                return updated;
            }
            updated.extend(self.equate(other.rewrites[&var]));
        }
        updated
    }

    /// Unit clauses for assignments and two binary clauses per rule.
    pub fn to_clauses(&self) -> Vec<Vec<Lit>> {
        let mut clauses = Vec::new();
        for var in sorted_keys(&self.assigned) {
            clauses.push(vec![Lit::new(var, !self.assigned[&var])]);
        }
        for var in sorted_keys(&self.rewrites) {
            let rule = self.rewrites[&var];
            // from -> to' and to' -> from, where to' is `to` with the rule's sign
            clauses.push(vec![rule.from.neg(), Lit::new(rule.to, rule.negated)]);
            clauses.push(vec![rule.from.pos(), Lit::new(rule.to, !rule.negated)]);
        }
        clauses
    }
}

impl fmt::Display for Knowledge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unsat {
            return writeln!(f, "Proven UNSAT");
        }
        if self.is_sat {
            return writeln!(f, "Proven SAT");
        }
        writeln!(f, "Assigned: {}", self.assigned.len())?;
        for var in sorted_keys(&self.assigned) {
            write!(f, "{}={} ", var.id(), self.assigned[&var] as u8)?;
        }
        writeln!(f)?;
        writeln!(f, "Two Consistencies: {}", self.rewrites.len())?;
        for var in sorted_keys(&self.rewrites) {
            write!(f, "{}, ", self.rewrites[&var])?;
        }
        writeln!(f)
    }
}
