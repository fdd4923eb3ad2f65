//! Boolean functions as ternary truth tables.
//!
//! A [`Function`] is an ordered list of variables (the header) plus a set of
//! rows. Each row is one satisfying assignment, where an [`Either`] cell
//! stands for both values of its column. The column order is bookkeeping
//! only: two tables with permuted columns denote the same function.
//!
//! Rows are kept sorted and free of duplicates. Removing a variable removes
//! its header entry and its cell from every row in the same step, so all
//! rows always have exactly as many cells as there are variables.
//!
//! [`Either`]: Value::Either

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use log::trace;
use num_bigint::BigUint;

use crate::knowledge::{Equivalence, Knowledge};
use crate::types::{Lit, Value, Var};

/// Widest table for which the full `2^n` assignment space is enumerated.
pub const MAX_ENUMERATED_VARIABLES: usize = 31;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Function {
    variables: Vec<Var>,
    rows: Vec<Vec<Value>>,
}

impl Function {
    /// Creates a function from a header and its rows.
    ///
    /// # Panics
    ///
    /// Panics if the header has duplicates or a row has the wrong width.
    pub fn new(variables: Vec<Var>, rows: Vec<Vec<Value>>) -> Self {
        let distinct: HashSet<Var> = variables.iter().copied().collect();
        assert_eq!(distinct.len(), variables.len(), "Duplicate variable in header {:?}", variables);
        for row in &rows {
            assert_eq!(
                row.len(),
                variables.len(),
                "Row of width {} in a table over {} variables",
                row.len(),
                variables.len()
            );
        }

        let mut f = Self { variables, rows };
        f.normalize();
        f
    }

    /// Creates a function whose rows are all concrete.
    pub fn from_bools(variables: Vec<Var>, rows: Vec<Vec<bool>>) -> Self {
        let rows = rows.into_iter().map(|row| row.into_iter().map(Value::from).collect()).collect();
        Self::new(variables, rows)
    }

    /// Creates a function from a bit-packed pattern set.
    ///
    /// Every set bit at position `p` of `patterns` contributes one row, in
    /// which variable `i` takes bit `i` of `p` (low bit = first variable).
    pub fn from_patterns(variables: Vec<Var>, patterns: &BigUint) -> Self {
        let n = variables.len();
        let mut rows = Vec::new();
        for position in 0..patterns.bits() {
            if !patterns.bit(position) {
                continue;
            }
            let row = (0..n)
                .map(|i| {
                    let bit = position.checked_shr(i as u32).map_or(false, |p| p & 1 == 1);
                    Value::from(bit)
                })
                .collect();
            rows.push(row);
        }
        Self::new(variables, rows)
    }

    /// The function accepted by a single clause: every assignment except the
    /// one falsifying all literals.
    ///
    /// A clause holding both polarities of a variable is a tautology and
    /// yields the zero-variable always-true function.
    pub fn from_clause(lits: &[Lit]) -> Self {
        let lits: BTreeSet<Lit> = lits.iter().copied().collect();
        let variables: Vec<Var> = lits.iter().map(|lit| lit.var()).collect::<BTreeSet<_>>().into_iter().collect();
        if variables.len() != lits.len() {
            return Self::new(Vec::new(), vec![Vec::new()]);
        }

        let n = variables.len();
        assert!(n <= MAX_ENUMERATED_VARIABLES, "Clause with {} literals is too wide", n);
        // In the forbidden assignment every literal is false.
        let forbidden: u64 = lits
            .iter()
            .enumerate()
            .filter(|(_, lit)| lit.is_negated())
            .map(|(i, _)| 1u64 << i)
            .sum();
        let rows = (0..1u64 << n)
            .filter(|&pattern| pattern != forbidden)
            .map(|pattern| (0..n).map(|i| Value::from(pattern >> i & 1 == 1)).collect())
            .collect();
        Self::new(variables, rows)
    }

    /// Reassembles rows given as variable maps, keeping only the variables
    /// present in every row.
    pub fn from_assignments(rows: &[BTreeMap<Var, Value>]) -> Self {
        let Some(first) = rows.first() else {
            return Self::new(Vec::new(), Vec::new());
        };
        let variables: Vec<Var> = first
            .keys()
            .copied()
            .filter(|var| rows.iter().all(|row| row.contains_key(var)))
            .collect();
        let rows = rows.iter().map(|row| variables.iter().map(|var| row[var]).collect()).collect();
        Self::new(variables, rows)
    }

    pub fn variables(&self) -> &[Var] {
        &self.variables
    }
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }
    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// No rows: the function is unsatisfiable.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_of(&self, var: Var) -> Option<usize> {
        self.variables.iter().position(|&v| v == var)
    }
    pub fn contains(&self, var: Var) -> bool {
        self.variables.contains(&var)
    }

    /// Row `r` as a variable map.
    pub fn row_assignment(&self, r: usize) -> BTreeMap<Var, Value> {
        self.variables.iter().copied().zip(self.rows[r].iter().copied()).collect()
    }

    /// Whether the function holds under `assignment`.
    ///
    /// Variables missing from `assignment` are left unconstrained.
    pub fn accepts(&self, assignment: &HashMap<Var, bool>) -> bool {
        self.rows.iter().any(|row| {
            self.variables
                .iter()
                .zip(row)
                .all(|(var, cell)| assignment.get(var).map_or(true, |&value| cell.admits(value)))
        })
    }

    /// Whether the rows cover all `2^n` assignments of the header.
    pub fn is_always_true(&self) -> bool {
        let n = self.variables.len();
        if n < 64 {
            let total = 1u64 << n;
            let upper_bound = self.rows.iter().fold(0u64, |acc, row| {
                acc.saturating_add(1u64 << row.iter().filter(|cell| !cell.is_concrete()).count())
            });
            if upper_bound < total {
                return false;
            }
            if self.rows.iter().all(|row| row.iter().all(|cell| cell.is_concrete())) {
                return self.rows.len() as u64 == total;
            }
        }
        let rows: Vec<&[Value]> = self.rows.iter().map(Vec::as_slice).collect();
        covers_all(&rows)
    }

    /// Forced assignments and signed equivalences visible in the table.
    ///
    /// Only fully concrete columns are considered. A column constant in
    /// every row yields an assignment, and two columns equal (or opposite)
    /// in every row yield an equivalence. A table without rows yields
    /// unsatisfiable knowledge.
    pub fn derive_knowledge(&self) -> Knowledge {
        let mut knowledge = Knowledge::new();
        if self.rows.is_empty() {
            knowledge.mark_unsat();
            return knowledge;
        }

        let first = &self.rows[0];
        let concrete: Vec<usize> = (0..self.variables.len())
            .filter(|&c| self.rows.iter().all(|row| row[c].is_concrete()))
            .collect();

        for (k, &i) in concrete.iter().enumerate() {
            if self.rows.iter().all(|row| row[i] == first[i]) {
                knowledge.assign(self.variables[i], first[i] == Value::True);
                continue;
            }
            // Relationship implied by the first row, invalidated by any
            // contradicting row.
            let mut consistent: Vec<(usize, bool)> = concrete[k + 1..].iter().map(|&j| (j, first[i] != first[j])).collect();
            for row in &self.rows[1..] {
                if consistent.is_empty() {
                    break;
                }
                consistent.retain(|&(j, negated)| (row[i] != row[j]) == negated);
            }
            for (j, negated) in consistent {
                knowledge.equate(Equivalence::new(self.variables[i], self.variables[j], negated));
            }
        }

        knowledge
    }

    /// Rewrites the table using `knowledge`.
    ///
    /// Assigned columns filter rows and disappear. Rewritten columns either
    /// filter against their partner column and disappear, or are renamed to
    /// the partner (flipping cells for a negated rule). Columns left entirely
    /// unconstrained are dropped. Returns whether anything changed.
    pub fn apply_knowledge(&mut self, knowledge: &Knowledge) -> bool {
        let mut changed = false;

        let mut i = 0;
        while i < self.variables.len() {
            let var = self.variables[i];

            if let Some(value) = knowledge.assignment(var) {
                self.rows.retain(|row| row[i].admits(value));
                self.remove_column(i);
                changed = true;
                continue;
            }

            let Some(&rule) = knowledge.rewrite(var) else {
                i += 1;
                continue;
            };
            changed = true;
            match self.column_of(rule.to) {
                Some(j) => {
                    // Both sides present: keep rows agreeing with the rule,
                    // then move this column's information onto the partner.
                    self.rows.retain(|row| match (row[i].as_bool(), row[j].as_bool()) {
                        (Some(a), Some(b)) => a == rule.transfer(b),
                        _ => true,
                    });
                    for row in &mut self.rows {
                        if let (Some(a), Value::Either) = (row[i].as_bool(), row[j]) {
                            row[j] = Value::from(rule.transfer(a));
                        }
                    }
                    self.remove_column(i);
                }
                None => {
                    self.variables[i] = rule.to;
                    if rule.negated {
                        for row in &mut self.rows {
                            row[i] = row[i].flip();
                        }
                    }
                    i += 1;
                }
            }
        }

        if !self.rows.is_empty() {
            let mut c = 0;
            while c < self.variables.len() {
                if self.rows.iter().all(|row| !row[c].is_concrete()) {
                    trace!("apply_knowledge: dropping unconstrained column {}", self.variables[c]);
                    self.remove_column(c);
                    changed = true;
                } else {
                    c += 1;
                }
            }
        }

        if changed {
            self.normalize();
        }
        changed
    }

    /// Natural join of two tables on their shared variables.
    ///
    /// The result is over `a`'s variables followed by `b`'s own, and accepts
    /// exactly the assignments accepted by both.
    pub fn merge(a: &Function, b: &Function) -> Function {
        let shared: Vec<(usize, usize)> = a
            .variables
            .iter()
            .enumerate()
            .filter_map(|(i, &var)| b.column_of(var).map(|j| (i, j)))
            .collect();
        let b_only: Vec<usize> = (0..b.variables.len()).filter(|&j| !a.contains(b.variables[j])).collect();

        let mut variables = a.variables.clone();
        variables.extend(b_only.iter().map(|&j| b.variables[j]));

        // Group `a`'s rows by their projection onto the shared columns.
        // Rows with an unconstrained shared cell cannot be hashed exactly and
        // are probed against every `b` row instead.
        let mut groups: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
        let mut wild: Vec<usize> = Vec::new();
        for (r, row) in a.rows.iter().enumerate() {
            let key: Vec<Value> = shared.iter().map(|&(i, _)| row[i]).collect();
            if key.iter().all(|cell| cell.is_concrete()) {
                groups.entry(key).or_default().push(r);
            } else {
                wild.push(r);
            }
        }

        let mut rows = Vec::new();
        let mut join = |a_row: &[Value], b_row: &[Value]| {
            if !shared.iter().all(|&(i, j)| a_row[i].is_compatible(b_row[j])) {
                return;
            }
            let mut row = a_row.to_vec();
            for &(i, j) in &shared {
                row[i] = row[i].meet(b_row[j]);
            }
            row.extend(b_only.iter().map(|&j| b_row[j]));
            rows.push(row);
        };

        for b_row in &b.rows {
            let key: Vec<Value> = shared.iter().map(|&(_, j)| b_row[j]).collect();
            if key.iter().all(|cell| cell.is_concrete()) {
                for &r in groups.get(&key).into_iter().flatten().chain(wild.iter()) {
                    join(a.rows[r].as_slice(), b_row.as_slice());
                }
            } else {
                for a_row in &a.rows {
                    join(a_row.as_slice(), b_row.as_slice());
                }
            }
        }

        Function::new(variables, rows)
    }

    /// Projects `var` out of the table.
    pub fn without_variable(&self, var: Var) -> Function {
        let mut f = self.clone();
        if let Some(c) = f.column_of(var) {
            f.remove_column(c);
            f.normalize();
        }
        f
    }

    /// One clause per assignment missing from the table.
    ///
    /// # Panics
    ///
    /// Panics if the table is too wide to enumerate.
    pub fn to_clauses(&self) -> Vec<Vec<Lit>> {
        let n = self.variables.len();
        assert!(n <= MAX_ENUMERATED_VARIABLES, "Table over {} variables is too wide to enumerate", n);
        let covered = self.covered_patterns();
        (0..1u64 << n)
            .filter(|pattern| !covered.contains(pattern))
            .map(|pattern| {
                self.variables
                    .iter()
                    .enumerate()
                    .map(|(i, &var)| Lit::new(var, pattern >> i & 1 == 1))
                    .collect()
            })
            .collect()
    }

    /// Every concrete assignment covered by the rows, as bit patterns
    /// (bit `i` = value of the `i`-th variable).
    fn covered_patterns(&self) -> HashSet<u64> {
        let mut covered = HashSet::new();
        for row in &self.rows {
            let mut partial = vec![0u64];
            for (i, cell) in row.iter().enumerate() {
                match cell.as_bool() {
                    Some(true) => partial.iter_mut().for_each(|p| *p |= 1 << i),
                    Some(false) => {}
                    None => {
                        let with_bit: Vec<u64> = partial.iter().map(|p| p | 1 << i).collect();
                        partial.extend(with_bit);
                    }
                }
            }
            covered.extend(partial);
        }
        covered
    }

    fn remove_column(&mut self, c: usize) {
        self.variables.remove(c);
        for row in &mut self.rows {
            row.remove(c);
        }
    }

    fn normalize(&mut self) {
        self.rows.sort_unstable();
        self.rows.dedup();
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for var in &self.variables {
            write!(f, "{} ", var.id())?;
        }
        writeln!(f)?;
        for row in &self.rows {
            for cell in row {
                write!(f, "{} ", cell)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Whether the cubes `rows` together cover every assignment of their columns.
///
/// Splits on the first column: the rows admitting `false` there must cover
/// the remaining columns, and so must the rows admitting `true`.
fn covers_all(rows: &[&[Value]]) -> bool {
    if rows.is_empty() {
        return false;
    }
    if rows.iter().any(|row| row.iter().all(|cell| !cell.is_concrete())) {
        return true;
    }
    // Some row still has a concrete cell, so no row is empty here.
    if rows.iter().all(|row| !row[0].is_concrete()) {
        let rest: Vec<&[Value]> = rows.iter().map(|row| &row[1..]).collect();
        return covers_all(&rest);
    }
    [false, true].into_iter().all(|value| {
        let rest: Vec<&[Value]> = rows
            .iter()
            .filter(|row| row[0].admits(value))
            .map(|row| &row[1..])
            .collect();
        covers_all(&rest)
    })
}
