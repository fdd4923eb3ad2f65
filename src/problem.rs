//! The simplification engine.
//!
//! A [`Problem`] owns every live [`Function`] in an [`Arena`] and keeps a
//! variable index mapping each variable to the handles of the functions
//! mentioning it. Indices and work-queues only ever hold handles, so a
//! function can be removed, merged or shrunk at any time; a handle that no
//! longer resolves is simply skipped.
//!
//! The engine alternates two kinds of work:
//!
//! - **propagation**: apply the global [`Knowledge`] to every function that
//!   needs it, harvest new facts from each, and re-open every function
//!   touching a variable those facts changed, until nothing changes;
//! - **search and reduction**: assume-and-learn (test each row of a
//!   function as a hypothesis and drop the ones leading to contradiction),
//!   variable extraction, merging and decomposition-driven splitting.
//!
//! # Example
//!
//! ```rust
//! use dnf_rs::function::Function;
//! use dnf_rs::problem::{Problem, ProblemConfig};
//! use dnf_rs::types::Var;
//!
//! let f = Function::from_bools(vec![Var::new(1), Var::new(2)], vec![vec![true, true], vec![true, false]]);
//! let mut problem = Problem::from_functions(ProblemConfig::default(), [f]);
//! problem.knowledge_propagate();
//! assert_eq!(problem.knowledge().assignment(Var::new(1)), Some(true));
//! assert!(problem.is_sat());
//! ```

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use log::{debug, info, trace, warn};

use crate::arena::{Arena, Handle};
use crate::decomposition::{decompose, full_decompose};
use crate::function::Function;
use crate::knowledge::Knowledge;
use crate::types::Var;

/// Handle of a live function.
pub type FunctionId = Handle;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ProblemConfig {
    /// Ceiling on the row-count product of a single merge performed by the
    /// engine's own reductions.
    pub merge_limit: usize,
    /// Minimum number of pieces a decomposition must yield before
    /// [`Problem::partition`] replaces the function.
    pub partition_limit: usize,
}

impl Default for ProblemConfig {
    fn default() -> Self {
        Self {
            merge_limit: 4096,
            partition_limit: 2,
        }
    }
}

impl ProblemConfig {
    pub fn with_merge_limit(mut self, merge_limit: usize) -> Self {
        self.merge_limit = merge_limit;
        self
    }

    pub fn with_partition_limit(mut self, partition_limit: usize) -> Self {
        self.partition_limit = partition_limit;
        self
    }
}

/// Size summary of a problem.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Stats {
    pub functions: usize,
    pub rows: usize,
    pub variables: usize,
    pub knowledge: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Functions: {} Rows: {} Variables: {} Knowledge: {}",
            self.functions, self.rows, self.variables, self.knowledge
        )
    }
}

#[derive(Debug, Default)]
pub struct Problem {
    config: ProblemConfig,
    functions: Arena<Function>,
    variable_index: HashMap<Var, BTreeSet<FunctionId>>,
    requires_propagation: BTreeSet<FunctionId>,
    requires_search: BTreeSet<FunctionId>,
    /// Assume-and-learn passes per function, carried over to replacements.
    visits: HashMap<FunctionId, usize>,
    knowledge: Knowledge,
    /// Functions refined by each in-place propagation batch, in order.
    #[cfg(test)]
    batches: Vec<Vec<FunctionId>>,
}

/// Applies `total` to `f`, harvests new facts into both `learned` and
/// `total`, and re-applies.
///
/// Returns whether `f` changed and which variables the new facts affected.
fn refine(f: &mut Function, total: &mut Knowledge, learned: &mut Knowledge) -> (bool, HashSet<Var>) {
    let mut changed = f.apply_knowledge(total);
    let derived = f.derive_knowledge();
    if derived.is_empty() {
        return (changed, HashSet::new());
    }
    learned.merge_in(&derived);
    let affected = total.merge_in(&derived);
    if total.is_unsat() {
        return (changed, affected);
    }
    changed |= f.apply_knowledge(total);
    (changed, affected)
}

impl Problem {
    pub fn new(config: ProblemConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn from_functions(config: ProblemConfig, functions: impl IntoIterator<Item = Function>) -> Self {
        let mut problem = Self::new(config);
        for f in functions {
            problem.add_function(f);
        }
        problem
    }

    pub fn config(&self) -> &ProblemConfig {
        &self.config
    }
    pub fn knowledge(&self) -> &Knowledge {
        &self.knowledge
    }
    pub fn is_sat(&self) -> bool {
        self.knowledge.is_sat()
    }
    pub fn is_unsat(&self) -> bool {
        self.knowledge.is_unsat()
    }

    /// Number of live functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id)
    }
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> + '_ {
        self.functions.iter()
    }
    pub fn function_ids(&self) -> Vec<FunctionId> {
        self.functions.handles()
    }

    /// Live functions mentioning `var`.
    pub fn observers(&self, var: Var) -> Vec<FunctionId> {
        self.observers_of([var].iter()).into_iter().collect()
    }

    pub fn occurrences(&self, var: Var) -> usize {
        self.variable_index.get(&var).map_or(0, BTreeSet::len)
    }

    /// Every variable mentioned by a live function, ascending.
    pub fn variables(&self) -> Vec<Var> {
        let mut vars: Vec<Var> = self.variable_index.keys().copied().collect();
        vars.sort_unstable();
        vars
    }

    pub fn pending_propagation(&self) -> usize {
        self.requires_propagation.len()
    }
    pub fn pending_search(&self) -> usize {
        self.requires_search.len()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            functions: self.functions.len(),
            rows: self.functions.values().map(Function::num_rows).sum(),
            variables: self.variable_index.len(),
            knowledge: self.knowledge.len(),
        }
    }

    /// Inserts `f` into the live set, marking it for propagation and search.
    ///
    /// Always-true functions carry no information and are not inserted. A
    /// zero-variable function without rows makes the problem unsatisfiable.
    pub fn add_function(&mut self, f: Function) -> Option<FunctionId> {
        if f.num_variables() == 0 {
            if f.is_empty() {
                debug!("add_function: empty table, problem is unsatisfiable");
                self.knowledge.mark_unsat();
            }
            return None;
        }
        if f.is_always_true() {
            debug!("add_function: rejecting always-true function over {:?}", f.variables());
            return None;
        }

        let variables = f.variables().to_vec();
        let id = self.functions.insert(f);
        self.index(id, &variables);
        self.requires_propagation.insert(id);
        self.requires_search.insert(id);
        Some(id)
    }

    /// Removes a function from the index, both work-queues and the live set.
    pub fn remove_function(&mut self, id: FunctionId) -> Option<Function> {
        let f = self.functions.remove(id)?;
        self.unindex(id, f.variables());
        self.requires_propagation.remove(&id);
        self.requires_search.remove(&id);
        self.visits.remove(&id);
        Some(f)
    }

    fn index(&mut self, id: FunctionId, variables: &[Var]) {
        for &var in variables {
            self.variable_index.entry(var).or_default().insert(id);
        }
    }

    fn unindex(&mut self, id: FunctionId, variables: &[Var]) {
        for var in variables {
            if let Some(observers) = self.variable_index.get_mut(var) {
                observers.remove(&id);
                if observers.is_empty() {
                    self.variable_index.remove(var);
                }
            }
        }
    }

    fn reindex(&mut self, id: FunctionId, old: &[Var], new: &[Var]) {
        let gone: Vec<Var> = old.iter().copied().filter(|var| !new.contains(var)).collect();
        let added: Vec<Var> = new.iter().copied().filter(|var| !old.contains(var)).collect();
        self.unindex(id, &gone);
        self.index(id, &added);
    }

    /// Live functions mentioning any of `vars`.
    ///
    /// An index entry pointing at a function that does not contain the
    /// variable is an engine bug: it panics in debug builds and is skipped
    /// with a warning otherwise.
    fn observers_of<'a>(&self, vars: impl IntoIterator<Item = &'a Var>) -> BTreeSet<FunctionId> {
        let mut result = BTreeSet::new();
        for var in vars {
            let Some(observers) = self.variable_index.get(var) else {
                continue;
            };
            for &id in observers {
                match self.functions.get(id) {
                    Some(f) if f.contains(*var) => {
                        result.insert(id);
                    }
                    _ => {
                        debug_assert!(false, "Index entry {} of {} does not contain the variable", id, var);
                        warn!("observers_of: skipping inconsistent index entry {} of {}", id, var);
                    }
                }
            }
        }
        result
    }

    /// Removes `id` if it no longer carries information, otherwise marks it
    /// for search.
    fn settle(&mut self, id: FunctionId) {
        let Some(f) = self.functions.get(id) else {
            return;
        };
        if f.num_variables() == 0 || f.is_always_true() {
            debug!("settle: removing {} (no longer constrains anything)", id);
            self.remove_function(id);
        } else {
            self.requires_search.insert(id);
        }
    }

    fn check_solved(&mut self) {
        if self.functions.is_empty() && !self.knowledge.is_unsat() && !self.knowledge.is_sat() {
            info!("No functions left, problem is satisfiable");
            self.knowledge.mark_sat();
        }
    }

    /// Propagates the global knowledge through every live function.
    ///
    /// Returns `false` if a contradiction was found.
    pub fn knowledge_propagate(&mut self) -> bool {
        let open: BTreeSet<FunctionId> = self.functions.handles().into_iter().collect();
        self.propagate_in_place(open);
        !self.knowledge.is_unsat()
    }

    /// Drains the pending-propagation queue.
    ///
    /// Returns `false` if a contradiction was found.
    pub fn propagate(&mut self) -> bool {
        let open = std::mem::take(&mut self.requires_propagation);
        self.propagate_in_place(open);
        !self.knowledge.is_unsat()
    }

    /// Propagates `knowledge` through the functions it touches.
    ///
    /// In place, the facts become part of the global knowledge and functions
    /// are rewritten. Otherwise the live set is left untouched, functions are
    /// copied before refinement and only the returned knowledge accumulates.
    /// Either way the result holds the newly learned facts and is flagged
    /// unsatisfiable if a contradiction was reached.
    pub fn propagate_knowledge(&mut self, knowledge: &Knowledge, modify_in_place: bool) -> Knowledge {
        if modify_in_place {
            self.add_knowledge(knowledge)
        } else {
            self.propagate_assumption(knowledge)
        }
    }

    /// Merges `knowledge` into the global knowledge and propagates in place.
    pub fn add_knowledge(&mut self, knowledge: &Knowledge) -> Knowledge {
        let affected = self.knowledge.merge_in(knowledge);
        if self.knowledge.is_unsat() {
            return Knowledge::unsat();
        }
        let mut open = self.observers_of(&affected);
        open.append(&mut self.requires_propagation);
        self.propagate_in_place(open)
    }

    /// Tests `hypothesis` against the live functions without modifying them.
    ///
    /// Only the functions touching a variable named by the hypothesis are
    /// seeded. The caller inspects [`Knowledge::is_unsat`] on the result.
    pub fn propagate_assumption(&self, hypothesis: &Knowledge) -> Knowledge {
        let named: Vec<Var> = hypothesis
            .assigned()
            .keys()
            .copied()
            .chain(hypothesis.rewrites().values().flat_map(|rule| [rule.from, rule.to]))
            .collect();
        let open = self.observers_of(&named);
        self.propagate_speculative(hypothesis, open)
    }

    fn propagate_in_place(&mut self, mut open: BTreeSet<FunctionId>) -> Knowledge {
        let mut learned = Knowledge::new();
        if self.knowledge.is_unsat() {
            learned.mark_unsat();
            return learned;
        }

        while !open.is_empty() {
            // Snapshot, so each function is visited at most once per batch.
            let batch = std::mem::take(&mut open);
            #[cfg(test)]
            self.batches.push(Vec::new());
            for id in batch {
                self.requires_propagation.remove(&id);
                let Some(f) = self.functions.get_mut(id) else {
                    continue;
                };
                #[cfg(test)]
                if let Some(current) = self.batches.last_mut() {
                    current.push(id);
                }
                let old_variables = f.variables().to_vec();
                let (changed, affected) = refine(f, &mut self.knowledge, &mut learned);
                if changed {
                    let new_variables = f.variables().to_vec();
                    self.reindex(id, &old_variables, &new_variables);
                }
                if self.knowledge.is_unsat() {
                    debug!("propagate: contradiction while refining {}", id);
                    learned.mark_unsat();
                    return learned;
                }
                open.extend(self.observers_of(&affected));
                if changed {
                    self.settle(id);
                }
            }
        }

        self.check_solved();
        learned
    }

    fn propagate_speculative(&self, seed: &Knowledge, mut open: BTreeSet<FunctionId>) -> Knowledge {
        let mut learned = Knowledge::new();
        let mut total = seed.clone();
        if total.is_unsat() {
            learned.mark_unsat();
            return learned;
        }

        while !open.is_empty() {
            let batch = std::mem::take(&mut open);
            for id in batch {
                let Some(f) = self.functions.get(id) else {
                    continue;
                };
                let mut copy = f.clone();
                let (_, affected) = refine(&mut copy, &mut total, &mut learned);
                if total.is_unsat() {
                    learned.mark_unsat();
                    return learned;
                }
                open.extend(self.observers_of(&affected));
            }
        }

        learned
    }

    fn next_search_candidate(&self) -> Option<FunctionId> {
        self.requires_search
            .iter()
            .filter_map(|&id| {
                let f = self.functions.get(id)?;
                Some((self.visits.get(&id).copied().unwrap_or(0), f.num_rows(), id))
            })
            .min()
            .map(|(_, _, id)| id)
    }

    /// Tests every row of every pending function as a hypothesis and drops
    /// the rows that propagate to a contradiction.
    pub fn assume_and_learn(&mut self) {
        if !self.propagate() {
            return;
        }

        let mut passes = 0usize;
        let mut dropped = 0usize;
        while let Some(id) = self.next_search_candidate() {
            passes += 1;
            self.requires_search.remove(&id);
            let visits = self.visits.get(&id).copied().unwrap_or(0) + 1;
            let Some(original) = self.remove_function(id) else {
                continue;
            };

            let mut survivors = Vec::with_capacity(original.num_rows());
            for r in 0..original.num_rows() {
                let row = original.row_assignment(r);
                let mut hypothesis = Knowledge::new();
                for (&var, cell) in &row {
                    if let Some(value) = cell.as_bool() {
                        hypothesis.assign(var, value);
                    }
                }
                let learned = self.propagate_assumption(&hypothesis);
                if learned.is_unsat() {
                    trace!("assume_and_learn: row {:?} of {} is contradictory", row, id);
                    dropped += 1;
                } else {
                    survivors.push(row);
                }
            }

            if survivors.is_empty() {
                info!("assume_and_learn: no row of {} survives, problem is unsatisfiable", id);
                self.knowledge.mark_unsat();
                return;
            }

            let replacement = Function::from_assignments(&survivors);
            // Every variable survives the rebuild, so only rows can change.
            let reshaped = replacement.num_rows() != original.num_rows();
            let derived = replacement.derive_knowledge();
            let variables = replacement.variables().to_vec();

            let new_id = self.add_function(replacement);
            if let Some(new_id) = new_id {
                self.requires_search.remove(&new_id);
                if !reshaped {
                    self.requires_propagation.remove(&new_id);
                }
                self.visits.insert(new_id, visits);
            }

            if reshaped {
                debug!(
                    "assume_and_learn: {} shrank from {} to {} rows",
                    id,
                    original.num_rows(),
                    survivors.len()
                );
                for other in self.observers_of(&variables) {
                    if Some(other) != new_id {
                        self.requires_search.insert(other);
                    }
                }
                if !derived.is_empty() {
                    debug!("assume_and_learn: learned {} new facts", derived.len());
                    self.add_knowledge(&derived);
                    if self.knowledge.is_unsat() {
                        return;
                    }
                } else if !self.propagate() {
                    return;
                }
            }
        }

        info!(
            "assume_and_learn: {} passes, {} rows dropped, {} facts known",
            passes,
            dropped,
            self.knowledge.len()
        );
        self.check_solved();
    }

    /// Replaces two live functions by their join.
    ///
    /// Returns the handle of the merged function, or `None` if either handle
    /// is stale, both are the same, or the join carries no information.
    pub fn merge_functions(&mut self, a: FunctionId, b: FunctionId) -> Option<FunctionId> {
        if a == b || !self.functions.contains(a) || !self.functions.contains(b) {
            return None;
        }
        let fa = self.remove_function(a)?;
        let fb = self.remove_function(b)?;
        let merged = Function::merge(&fa, &fb);
        debug!(
            "merge: {} ({} rows) and {} ({} rows) into {} vars / {} rows",
            a,
            fa.num_rows(),
            b,
            fb.num_rows(),
            merged.num_variables(),
            merged.num_rows()
        );
        self.add_function(merged)
    }

    /// Joins functions defined over exactly the same variables.
    ///
    /// Returns the number of merges performed.
    pub fn collapse_duplicates(&mut self) -> usize {
        let mut by_variables: BTreeMap<Vec<Var>, Vec<FunctionId>> = BTreeMap::new();
        for (id, f) in self.functions.iter() {
            let mut key = f.variables().to_vec();
            key.sort_unstable();
            by_variables.entry(key).or_default().push(id);
        }

        let mut merges = 0;
        for ids in by_variables.into_values().filter(|ids| ids.len() > 1) {
            let mut acc = ids[0];
            for &id in &ids[1..] {
                match self.merge_functions(acc, id) {
                    Some(merged) => {
                        acc = merged;
                        merges += 1;
                    }
                    None => break,
                }
            }
        }
        if merges > 0 {
            debug!("collapse_duplicates: {} merges", merges);
        }
        merges
    }

    /// Joins each function into the smallest other function whose variables
    /// include all of its own, within the merge limit.
    ///
    /// Returns the number of merges performed.
    pub fn merge_subsumed(&mut self) -> usize {
        let mut merges = 0;
        for id in self.functions.handles() {
            let Some(f) = self.functions.get(id) else {
                continue;
            };
            let Some(&first) = f.variables().first() else {
                continue;
            };
            let host = self
                .observers(first)
                .into_iter()
                .filter(|&other| other != id)
                .filter_map(|other| self.functions.get(other).map(|g| (other, g)))
                .filter(|(_, g)| {
                    f.variables().iter().all(|&var| g.contains(var))
                        && g.num_rows().saturating_mul(f.num_rows()) <= self.config.merge_limit
                })
                .min_by_key(|(other, g)| (g.num_rows(), *other))
                .map(|(other, _)| other);
            if let Some(host) = host {
                if self.merge_functions(host, id).is_some() {
                    merges += 1;
                }
            }
        }
        if merges > 0 {
            debug!("merge_subsumed: {} merges", merges);
        }
        merges
    }

    /// Splits functions into independent pieces via [`full_decompose`].
    ///
    /// Variables are decomposed in ascending order of occurrence count. A
    /// function is replaced only if it yields at least
    /// [`partition_limit`][ProblemConfig::partition_limit] pieces, each over
    /// fewer variables than the original. Returns the number of functions
    /// split.
    pub fn partition(&mut self) -> usize {
        let mut splits = 0;
        for id in self.functions.handles() {
            let Some(f) = self.functions.get(id) else {
                continue;
            };
            let mut order = f.variables().to_vec();
            order.sort_by_key(|&var| (self.occurrences(var), var));
            let pieces = full_decompose(f, &order);
            if pieces.len() < self.config.partition_limit
                || pieces.iter().any(|piece| piece.num_variables() >= f.num_variables())
            {
                continue;
            }

            debug!("partition: splitting {} into {} pieces", id, pieces.len());
            self.remove_function(id);
            for piece in pieces {
                self.add_function(piece);
            }
            splits += 1;
        }
        splits
    }

    /// Eliminates `var` by merging every function that mentions it and
    /// projecting it out.
    ///
    /// Before each merge the piece is decomposed around `var`, so only its
    /// part depending on `var` takes part in the merge; the rest goes back
    /// into the live set unchanged. If a merge would exceed the merge limit,
    /// every function is restored and `false` is returned.
    pub fn extract_variable(&mut self, var: Var) -> bool {
        let ids = self.observers(var);
        if ids.is_empty() {
            return false;
        }

        let mut originals: Vec<Function> = ids.iter().filter_map(|&id| self.remove_function(id)).collect();
        if originals.len() == 1 {
            let reduced = originals[0].without_variable(var);
            debug!("extract_variable: {} only in one function", var);
            self.add_function(reduced);
            return true;
        }

        // Variables shared between the pieces are free to condition on.
        let mut counts: HashMap<Var, usize> = HashMap::new();
        for f in &originals {
            for &v in f.variables() {
                *counts.entry(v).or_default() += 1;
            }
        }
        let shared: HashSet<Var> = counts.into_iter().filter(|&(v, count)| v != var && count > 1).map(|(v, _)| v).collect();

        // Smallest first.
        originals.sort_by_key(|f| Reverse(f.num_rows()));
        let mut pending = originals.clone();
        let mut residuals = Vec::new();
        let mut merged: Option<Function> = None;
        while let Some(next) = pending.pop() {
            let mut pieces = decompose(&next, var, &shared);
            if pieces.len() == 2 {
                residuals.extend(pieces.pop());
            }
            let Some(core) = pieces.pop() else {
                continue;
            };
            merged = match merged {
                None => Some(core),
                Some(acc) => {
                    if acc.num_rows().saturating_mul(core.num_rows()) > self.config.merge_limit {
                        debug!(
                            "extract_variable: merging {} rows with {} rows exceeds the limit, restoring",
                            acc.num_rows(),
                            core.num_rows()
                        );
                        for f in originals {
                            self.add_function(f);
                        }
                        return false;
                    }
                    Some(Function::merge(&acc, &core))
                }
            };
        }

        if let Some(acc) = merged {
            let reduced = acc.without_variable(var);
            debug!(
                "extract_variable: {} eliminated, result over {} vars / {} rows",
                var,
                reduced.num_variables(),
                reduced.num_rows()
            );
            self.add_function(reduced);
        }
        for residual in residuals {
            self.add_function(residual);
        }
        true
    }

    /// Tries [`extract_variable`][Self::extract_variable] on every variable,
    /// fewest occurrences first. Returns the number of variables eliminated.
    pub fn extract_variables(&mut self) -> usize {
        let mut order = self.variables();
        order.sort_by_key(|&var| (self.occurrences(var), var));
        let mut extracted = 0;
        for var in order {
            if self.knowledge.is_unsat() {
                break;
            }
            if self.occurrences(var) > 0 && self.extract_variable(var) {
                extracted += 1;
            }
        }
        if extracted > 0 {
            info!("extract_variables: eliminated {} variables", extracted);
        }
        extracted
    }

    /// Checks the index, the work-queues and the live set against each other.
    ///
    /// Functions not pending propagation must not mention variables the
    /// global knowledge assigns or rewrites.
    pub fn sanity_check(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        for (var, observers) in &self.variable_index {
            if observers.is_empty() {
                problems.push(format!("empty index entry for {}", var));
            }
            for &id in observers {
                match self.functions.get(id) {
                    None => problems.push(format!("index entry of {} holds stale handle {}", var, id)),
                    Some(f) if !f.contains(*var) => {
                        problems.push(format!("index entry of {} holds {} which does not contain it", var, id))
                    }
                    Some(_) => {}
                }
            }
        }

        for (id, f) in self.functions.iter() {
            for var in f.variables() {
                if !self.variable_index.get(var).map_or(false, |observers| observers.contains(&id)) {
                    problems.push(format!("{} is not indexed under {}", id, var));
                }
                if !self.requires_propagation.contains(&id) && self.knowledge.constrains(*var) {
                    problems.push(format!("{} still mentions constrained variable {}", id, var));
                }
            }
            if f.num_variables() == 0 || f.is_always_true() {
                problems.push(format!("{} carries no information", id));
            }
        }

        for id in self.requires_propagation.iter().chain(self.requires_search.iter()) {
            if !self.functions.contains(*id) {
                problems.push(format!("work-queue holds stale handle {}", id));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for function in self.functions.values() {
            writeln!(f, "{}", function)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::function::tests::{models, vars};
    use crate::knowledge::Equivalence;
    use crate::types::Value::{self, Either as X, False as F, True as T};

    fn func(ids: &[u32], rows: Vec<Vec<Value>>) -> Function {
        Function::new(vars(ids), rows)
    }

    /// x1 ∨ x2, x2 → x3, ¬(x1 ∧ x3): forces x2 = x3 = ¬x1.
    fn triangle() -> Problem {
        Problem::from_functions(
            ProblemConfig::default(),
            [
                func(&[1, 2], vec![vec![F, T], vec![T, T], vec![T, F]]),
                func(&[2, 3], vec![vec![F, F], vec![F, T], vec![T, T]]),
                func(&[1, 3], vec![vec![F, F], vec![F, T], vec![T, F]]),
            ],
        )
    }

    #[test]
    fn test_search_prefers_fewer_rows() {
        let mut problem = Problem::new(ProblemConfig::default());
        let wide = problem.add_function(func(&[1, 2], vec![vec![F, T], vec![T, T], vec![T, F]])).unwrap();
        let narrow = problem.add_function(func(&[3, 4], vec![vec![F, X], vec![T, T]])).unwrap();
        assert!(wide < narrow);
        assert_eq!(problem.next_search_candidate(), Some(narrow));

        problem.requires_search.remove(&narrow);
        assert_eq!(problem.next_search_candidate(), Some(wide));
    }

    #[test]
    fn test_replacement_keeps_visit_count() {
        let mut problem = Problem::new(ProblemConfig::default());
        problem.add_function(func(&[1, 2], vec![vec![F, T], vec![T, T], vec![T, F]]));
        problem.add_function(func(&[3, 4], vec![vec![F, X], vec![T, T]]));
        problem.assume_and_learn();
        assert_eq!(problem.len(), 2);
        assert_eq!(problem.pending_search(), 0);

        let narrow = problem.observers(Var::new(3))[0];
        assert_eq!(problem.visits.get(&narrow), Some(&1));

        // A never-visited function wins over a smaller one visited before
        let fresh = problem.add_function(func(&[5, 6], vec![vec![F, T], vec![T, T], vec![T, F]])).unwrap();
        problem.requires_search.insert(narrow);
        assert_eq!(problem.next_search_candidate(), Some(fresh));

        problem.assume_and_learn();
        let narrow = problem.observers(Var::new(3))[0];
        let fresh = problem.observers(Var::new(5))[0];
        assert_eq!(problem.visits.get(&narrow), Some(&2));
        assert_eq!(problem.visits.get(&fresh), Some(&1));
    }

    #[test]
    fn test_reopened_function_waits_for_next_batch() {
        let mut problem = Problem::new(ProblemConfig::default());
        // x1 ∨ x3
        let early = problem.add_function(func(&[1, 3], vec![vec![F, T], vec![T, F], vec![T, T]])).unwrap();
        // x1 forced, x2 free
        let late = problem.add_function(func(&[1, 2], vec![vec![T, F], vec![T, T]])).unwrap();
        assert!(early < late);

        assert!(problem.propagate());
        // `late` learns x1 after `early` was refined, so `early` is refined
        // again only in the following batch.
        assert_eq!(problem.batches, vec![vec![early, late], vec![early]]);
        assert_eq!(problem.knowledge().assignment(Var::new(1)), Some(true));
        assert!(problem.is_empty());
        assert!(problem.is_sat());
    }

    #[test]
    fn test_add_function_rejects_always_true() {
        let mut problem = Problem::new(ProblemConfig::default());
        let f = func(&[1], vec![vec![F], vec![T]]);
        assert_eq!(problem.add_function(f), None);
        assert!(problem.is_empty());
        assert!(problem.variables().is_empty());
    }

    #[test]
    fn test_add_function_empty_zero_variable_is_unsat() {
        let mut problem = Problem::new(ProblemConfig::default());
        assert_eq!(problem.add_function(func(&[], vec![])), None);
        assert!(problem.is_unsat());
    }

    #[test]
    fn test_add_and_remove_function() {
        let mut problem = Problem::new(ProblemConfig::default());
        let id = problem.add_function(func(&[1, 2], vec![vec![T, T], vec![F, F]])).unwrap();
        assert_eq!(problem.observers(Var::new(1)), vec![id]);
        assert_eq!(problem.pending_propagation(), 1);
        assert_eq!(problem.pending_search(), 1);
        assert!(problem.sanity_check().is_ok());

        let f = problem.remove_function(id).unwrap();
        assert_eq!(f.num_rows(), 2);
        assert!(problem.observers(Var::new(1)).is_empty());
        assert_eq!(problem.pending_propagation(), 0);
        assert_eq!(problem.pending_search(), 0);
        assert!(problem.function(id).is_none());
        assert!(problem.remove_function(id).is_none());
    }

    #[test]
    fn test_propagate_assignment_chain() {
        let mut problem = Problem::from_functions(
            ProblemConfig::default(),
            [
                func(&[1, 2], vec![vec![T, T], vec![T, F]]),
                func(&[1, 3], vec![vec![T, T], vec![F, F]]),
            ],
        );
        assert!(problem.knowledge_propagate());
        let k = problem.knowledge();
        assert_eq!(k.assignment(Var::new(1)), Some(true));
        assert_eq!(k.assignment(Var::new(3)), Some(true));
        assert!(problem.is_empty());
        assert!(problem.is_sat());
    }

    #[test]
    fn test_propagate_equivalence_renames() {
        let mut problem = Problem::from_functions(
            ProblemConfig::default(),
            [
                func(&[1, 5], vec![vec![T, F], vec![F, T]]),
                func(&[5, 6], vec![vec![T, T], vec![F, T], vec![T, F]]),
            ],
        );
        assert!(problem.knowledge_propagate());
        let rule = problem.knowledge().rewrite(Var::new(5)).copied();
        assert_eq!(rule, Some(Equivalence::new(Var::new(5), Var::new(1), true)));
        assert_eq!(problem.len(), 1);
        let (_, f) = problem.functions().next().unwrap();
        assert_eq!(f.variables(), &vars(&[1, 6])[..]);
        assert!(problem.observers(Var::new(5)).is_empty());
        assert!(problem.sanity_check().is_ok());
    }

    #[test]
    fn test_propagate_contradiction() {
        let mut problem = Problem::from_functions(
            ProblemConfig::default(),
            [func(&[1, 2], vec![vec![T, T], vec![T, F]]), func(&[1, 2], vec![vec![F, T]])],
        );
        assert!(!problem.knowledge_propagate());
        assert!(problem.is_unsat());
    }

    #[test]
    fn test_propagate_assumption_leaves_functions_untouched() {
        let problem = triangle();
        let before: Vec<Function> = problem.functions().map(|(_, f)| f.clone()).collect();

        let mut hypothesis = Knowledge::new();
        hypothesis.assign(Var::new(1), true);
        let learned = problem.propagate_assumption(&hypothesis);
        assert!(!learned.is_unsat());
        // x1 forces ¬x3, which forces ¬x2 through x2 → x3.
        assert_eq!(learned.assignment(Var::new(3)), Some(false));
        assert_eq!(learned.assignment(Var::new(2)), Some(false));

        hypothesis.assign(Var::new(2), true);
        assert!(problem.propagate_assumption(&hypothesis).is_unsat());

        let after: Vec<Function> = problem.functions().map(|(_, f)| f.clone()).collect();
        assert_eq!(before, after);
        assert!(problem.knowledge().is_empty());
    }

    #[test]
    fn test_propagate_knowledge_modes() {
        let mut problem = triangle();
        let mut k = Knowledge::new();
        k.assign(Var::new(1), true);

        let speculative = problem.propagate_knowledge(&k, false);
        assert_eq!(speculative.assignment(Var::new(3)), Some(false));
        assert!(problem.knowledge().is_empty());

        let learned = problem.propagate_knowledge(&k, true);
        assert!(!learned.is_unsat());
        assert_eq!(problem.knowledge().assignment(Var::new(1)), Some(true));
        assert_eq!(problem.knowledge().assignment(Var::new(3)), Some(false));
        assert!(problem.sanity_check().is_ok());
    }

    #[test]
    fn test_assume_and_learn_finds_equivalences() {
        let mut problem = triangle();
        assert!(problem.knowledge_propagate());
        assert!(problem.knowledge().is_empty());

        problem.assume_and_learn();
        let k = problem.knowledge();
        assert!(!k.is_unsat());
        assert_eq!(k.rewrite(Var::new(2)).map(|r| (r.to, r.negated)), Some((Var::new(1), true)));
        assert_eq!(k.rewrite(Var::new(3)).map(|r| (r.to, r.negated)), Some((Var::new(1), true)));
        assert!(problem.is_empty());
        assert!(problem.is_sat());
    }

    #[test]
    fn test_assume_and_learn_detects_unsat() {
        // x1 ∨ x2, x1 → x3, x2 → x3, x3 → x4, x3 → ¬x4: unsatisfiable, but
        // no single table forces anything until its rows are tested.
        let implies = vec![vec![F, F], vec![F, T], vec![T, T]];
        let mut problem = Problem::from_functions(
            ProblemConfig::default(),
            [
                func(&[1, 2], vec![vec![F, T], vec![T, F], vec![T, T]]),
                func(&[1, 3], implies.clone()),
                func(&[2, 3], implies.clone()),
                func(&[3, 4], implies),
                func(&[3, 4], vec![vec![F, F], vec![F, T], vec![T, F]]),
            ],
        );
        assert!(problem.knowledge_propagate());
        assert!(problem.knowledge().is_empty());
        problem.assume_and_learn();
        assert!(problem.is_unsat());
    }

    #[test]
    fn test_merge_functions() {
        let mut problem = triangle();
        let ids = problem.function_ids();
        let merged = problem.merge_functions(ids[0], ids[1]).unwrap();
        assert_eq!(problem.len(), 2);
        let f = problem.function(merged).unwrap();
        assert_eq!(f.num_variables(), 3);
        assert!(problem.merge_functions(ids[0], ids[2]).is_none());
        assert!(problem.merge_functions(merged, merged).is_none());
        assert!(problem.sanity_check().is_ok());
    }

    #[test]
    fn test_collapse_duplicates() {
        let mut problem = Problem::from_functions(
            ProblemConfig::default(),
            [
                func(&[1, 2], vec![vec![F, F], vec![F, T], vec![T, T]]),
                func(&[2, 1], vec![vec![F, F], vec![T, T], vec![F, T]]),
                func(&[3, 4], vec![vec![F, F], vec![T, T]]),
            ],
        );
        assert_eq!(problem.collapse_duplicates(), 1);
        assert_eq!(problem.len(), 2);
        let id = problem.observers(Var::new(1))[0];
        // x1 → x2 and x2 → x1
        assert_eq!(problem.function(id).unwrap().num_rows(), 2);
    }

    #[test]
    fn test_merge_subsumed() {
        let mut problem = Problem::from_functions(
            ProblemConfig::default(),
            [
                func(&[1, 2], vec![vec![F, F], vec![F, T], vec![T, T]]),
                func(&[1, 2, 3], vec![vec![T, F, T], vec![T, T, F], vec![F, T, T], vec![F, F, F]]),
            ],
        );
        assert_eq!(problem.merge_subsumed(), 1);
        assert_eq!(problem.len(), 1);
        let (_, f) = problem.functions().next().unwrap();
        assert_eq!(f.num_variables(), 3);
        assert_eq!(f.num_rows(), 3);
    }

    #[test]
    fn test_merge_subsumed_respects_limit() {
        let mut problem = Problem::from_functions(
            ProblemConfig::default().with_merge_limit(4),
            [
                func(&[1, 2], vec![vec![F, F], vec![F, T], vec![T, T]]),
                func(&[1, 2, 3], vec![vec![T, F, T], vec![T, T, F], vec![F, T, T], vec![F, F, F]]),
            ],
        );
        assert_eq!(problem.merge_subsumed(), 0);
        assert_eq!(problem.len(), 2);
    }

    #[test]
    fn test_partition_splits_independent_parts() {
        // (x1 = x2) ∧ (x3 ∨ x4)
        let mut rows = Vec::new();
        for &(a, b) in &[(F, F), (T, T)] {
            for &(c, d) in &[(F, T), (T, F), (T, T)] {
                rows.push(vec![a, b, c, d]);
            }
        }
        let f = func(&[1, 2, 3, 4], rows);
        let mut problem = Problem::from_functions(ProblemConfig::default(), [f.clone()]);
        assert_eq!(problem.partition(), 1);
        assert_eq!(problem.len(), 2);

        let pieces: Vec<Function> = problem.functions().map(|(_, g)| g.clone()).collect();
        let joined = Function::merge(&pieces[0], &pieces[1]);
        let all = vars(&[1, 2, 3, 4]);
        assert_eq!(models(&joined, &all), models(&f, &all));
        assert!(problem.sanity_check().is_ok());
    }

    #[test]
    fn test_extract_variable_single_function() {
        let mut problem = Problem::from_functions(
            ProblemConfig::default(),
            [func(&[1, 2], vec![vec![T, T], vec![F, F]]), func(&[1, 3], vec![vec![T, T], vec![F, T], vec![T, F]])],
        );
        assert!(problem.extract_variable(Var::new(2)));
        assert!(problem.observers(Var::new(2)).is_empty());
        // x1 is free once x2 is gone
        assert_eq!(problem.len(), 1);
    }

    #[test]
    fn test_extract_variable_merges() {
        // x1 → x2, x2 → x3
        let mut problem = Problem::from_functions(
            ProblemConfig::default(),
            [
                func(&[1, 2], vec![vec![F, F], vec![F, T], vec![T, T]]),
                func(&[2, 3], vec![vec![F, F], vec![F, T], vec![T, T]]),
            ],
        );
        assert!(problem.extract_variable(Var::new(2)));
        assert!(problem.observers(Var::new(2)).is_empty());
        assert_eq!(problem.len(), 1);

        // x1 → x3 remains
        let (_, f) = problem.functions().next().unwrap();
        let implication = func(&[1, 3], vec![vec![F, F], vec![F, T], vec![T, T]]);
        let over = vars(&[1, 3]);
        assert_eq!(models(f, &over), models(&implication, &over));
        assert!(problem.sanity_check().is_ok());
    }

    #[test]
    fn test_extract_variable_aborts_over_limit() {
        let mut problem = Problem::from_functions(
            ProblemConfig::default().with_merge_limit(1),
            [
                func(&[1, 2], vec![vec![F, F], vec![F, T], vec![T, T]]),
                func(&[2, 3], vec![vec![F, F], vec![F, T], vec![T, T]]),
            ],
        );
        assert!(!problem.extract_variable(Var::new(2)));
        assert_eq!(problem.len(), 2);
        assert_eq!(problem.occurrences(Var::new(2)), 2);
        assert_eq!(problem.stats().rows, 6);
    }

    #[test]
    fn test_stats() {
        let problem = triangle();
        let stats = problem.stats();
        assert_eq!(stats, Stats { functions: 3, rows: 9, variables: 3, knowledge: 0 });
        assert_eq!(stats.to_string(), "Functions: 3 Rows: 9 Variables: 3 Knowledge: 0");
    }

    #[test]
    fn test_sanity_check_reports_inconsistency() {
        let mut problem = triangle();
        let id = problem.function_ids()[0];
        problem.variable_index.entry(Var::new(9)).or_default().insert(id);
        let problems = problem.sanity_check().unwrap_err();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("does not contain"));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "does not contain the variable")]
    fn test_inconsistent_index_panics_in_debug() {
        let mut problem = triangle();
        let id = problem.function_ids()[0];
        problem.variable_index.entry(Var::new(9)).or_default().insert(id);
        problem.observers(Var::new(9));
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_inconsistent_index_skipped_in_release() {
        let mut problem = triangle();
        let id = problem.function_ids()[0];
        problem.variable_index.entry(Var::new(9)).or_default().insert(id);
        assert!(problem.observers(Var::new(9)).is_empty());
    }

    #[test]
    fn test_stale_queue_entries_are_skipped() {
        let mut problem = triangle();
        let id = problem.function_ids()[0];
        problem.remove_function(id);
        let mut k = Knowledge::new();
        k.assign(Var::new(2), false);
        // Removed functions are neither visited nor resurrected.
        let learned = problem.add_knowledge(&k);
        assert!(!learned.is_unsat());
        assert!(problem.function(id).is_none());
        assert!(problem.sanity_check().is_ok());
    }
}
