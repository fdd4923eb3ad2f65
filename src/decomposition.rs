//! Entropy-guided decomposition of a function around one target variable.
//!
//! Given a table and a *target* column, the rows are grouped by the values
//! of a growing list of *split* columns until every group agrees on the
//! target. When that needs fewer than all columns, the function factors
//! into:
//!
//! - a **decision** function over the split columns plus the target, with
//!   one row per group (two if the group leaves the target unconstrained),
//! - a **residual** function, the original with the target projected out.
//!
//! Joining the two gives back the original function. Split columns are
//! chosen greedily by the weighted Shannon entropy of the target within the
//! groups they would produce, lowest first.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use log::debug;

use crate::function::Function;
use crate::types::{Value, Var};
use crate::utils::entropy;

#[derive(Debug, Clone)]
pub struct Decomposition {
    table: Vec<Vec<Value>>,
    /// Permutation of row indices, groups are contiguous ranges of it.
    row_pointers: Vec<usize>,
    /// Exclusive end of each group inside `row_pointers`.
    end_of_group: Vec<usize>,
    split_on: Vec<usize>,
    target_column: usize,
}

impl Decomposition {
    /// Starts with every row in a single group.
    ///
    /// Unconstrained cells outside the target column are expanded, then rows
    /// identical everywhere except the target are combined, leaving
    /// [`Value::Either`] in the target where they disagree.
    pub fn new(rows: &[Vec<Value>], target_column: usize) -> Self {
        let table = combine_identical(&expand_unconstrained(rows, target_column), target_column);
        let row_pointers: Vec<usize> = (0..table.len()).collect();
        let end_of_group = if table.is_empty() { Vec::new() } else { vec![table.len()] };
        Self {
            table,
            row_pointers,
            end_of_group,
            split_on: Vec::new(),
            target_column,
        }
    }

    pub fn total_groups(&self) -> usize {
        self.end_of_group.len()
    }
    pub fn total_rows(&self) -> usize {
        self.table.len()
    }
    pub fn split_on(&self) -> &[usize] {
        &self.split_on
    }

    fn groups(&self) -> impl Iterator<Item = &[usize]> + '_ {
        let starts = std::iter::once(0).chain(self.end_of_group.iter().copied());
        starts.zip(self.end_of_group.iter().copied()).map(|(start, end)| &self.row_pointers[start..end])
    }

    /// Weighted entropy of the target after splitting every group on
    /// `split_column`, normalised by the total row count. Lower is better.
    pub fn entropy_of_split(&self, split_column: usize) -> f64 {
        let total_rows = self.table.len() as f64;
        let mut total_entropy = 0.0;
        for group in self.groups() {
            let mut group_count = [0usize; 2];
            let mut value_count = [[0usize; 3]; 2];
            for &p in group {
                let row = &self.table[p];
                let side = (row[split_column] == Value::True) as usize;
                value_count[side][row[self.target_column].index()] += 1;
                group_count[side] += 1;
            }
            for side in 0..2 {
                total_entropy += (group_count[side] as f64 / total_rows) * entropy(&value_count[side], group_count[side]);
            }
        }
        total_entropy
    }

    /// Every group agrees on the target column.
    pub fn is_perfectly_decomposed(&self) -> bool {
        self.groups().all(|group| {
            let value = self.table[group[0]][self.target_column];
            group.iter().all(|&p| self.table[p][self.target_column] == value)
        })
    }

    /// Splits every group into its `false` and `true` part on `split_column`.
    ///
    /// A group entirely on one side stays as it is.
    pub fn split(&mut self, split_column: usize) {
        self.split_on.push(split_column);

        let mut new_ends = Vec::with_capacity(self.end_of_group.len() * 2);
        let mut start = 0;
        for &end in &self.end_of_group {
            let group = &mut self.row_pointers[start..end];
            let mut falses = 0;
            for i in 0..group.len() {
                if self.table[group[i]][split_column] != Value::True {
                    group.swap(i, falses);
                    falses += 1;
                }
            }
            if falses > 0 {
                new_ends.push(start + falses);
            }
            if start + falses < end {
                new_ends.push(end);
            }
            start = end;
        }

        assert!(self.end_of_group.len() <= new_ends.len(), "Splitting cannot make fewer groups");
        self.end_of_group = new_ends;
    }

    /// The decision function: split columns plus the target, one row per
    /// group, or two when the group's target is unconstrained.
    pub fn to_function(&self, column_to_variable: &[Var]) -> Function {
        let mut columns = self.split_on.clone();
        columns.push(self.target_column);

        let mut rows = Vec::with_capacity(self.total_groups());
        for group in self.groups() {
            let first = &self.table[group[0]];
            debug_assert!(group.iter().all(|&p| columns.iter().all(|&c| self.table[p][c] == first[c])));
            let mut row: Vec<Value> = columns.iter().map(|&c| first[c]).collect();
            if row[columns.len() - 1] == Value::Either {
                let last = columns.len() - 1;
                row[last] = Value::False;
                let mut other = row.clone();
                other[last] = Value::True;
                rows.push(row);
                rows.push(other);
            } else {
                rows.push(row);
            }
        }

        let variables = columns.iter().map(|&c| column_to_variable[c]).collect();
        Function::new(variables, rows)
    }
}

impl fmt::Display for Decomposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Splitting column {} on columns: ", self.target_column)?;
        for column in &self.split_on {
            write!(f, "{} ", column)?;
        }
        writeln!(f)?;
        for group in self.groups() {
            writeln!(f, "Group")?;
            for &p in group {
                write!(f, "\t")?;
                for cell in &self.table[p] {
                    write!(f, "{} ", cell)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

fn expand_unconstrained(rows: &[Vec<Value>], target_column: usize) -> Vec<Vec<Value>> {
    let mut expanded = Vec::with_capacity(rows.len());
    for row in rows {
        let mut partial = vec![row.clone()];
        for c in 0..row.len() {
            if c == target_column || row[c].is_concrete() {
                continue;
            }
            partial = partial
                .into_iter()
                .flat_map(|r| {
                    [Value::False, Value::True].map(|value| {
                        let mut r = r.clone();
                        r[c] = value;
                        r
                    })
                })
                .collect();
        }
        expanded.extend(partial);
    }
    expanded
}

/// Merges rows equal on every column but `column`, marking that column
/// [`Value::Either`] when the merged rows disagree on it.
pub fn combine_identical(table: &[Vec<Value>], column: usize) -> Vec<Vec<Value>> {
    let mut unique: BTreeMap<Vec<Value>, Value> = BTreeMap::new();
    for row in table {
        let mut key = row.clone();
        let value = key.remove(column);
        unique
            .entry(key)
            .and_modify(|v| {
                if *v != value {
                    *v = Value::Either;
                }
            })
            .or_insert(value);
    }
    unique
        .into_iter()
        .map(|(mut row, value)| {
            row.insert(column, value);
            row
        })
        .collect()
}

/// Factors `f` around `target` into `[decision, residual]`.
///
/// Columns of `free_variables` are split on first, unconditionally; the
/// remaining columns are chosen by entropy until the groups are pure on the
/// target. When every column is needed, or every row ends up in its own
/// group, the factoring gains nothing and `[f]` is returned.
///
/// # Panics
///
/// Panics if `target` is not a variable of `f`.
pub fn decompose(f: &Function, target: Var, free_variables: &HashSet<Var>) -> Vec<Function> {
    let target_column = match f.column_of(target) {
        Some(c) => c,
        None => panic!("Cannot decompose on {}: not a variable of {:?}", target, f.variables()),
    };
    if f.is_empty() {
        return vec![f.clone()];
    }

    let variables = f.variables();
    let mut decomposed = Decomposition::new(f.rows(), target_column);
    let mut unused_columns = Vec::new();
    for (i, var) in variables.iter().enumerate() {
        if i == target_column {
            continue;
        }
        if free_variables.contains(var) {
            decomposed.split(i);
        } else {
            unused_columns.push(i);
        }
    }

    while !decomposed.is_perfectly_decomposed() && !unused_columns.is_empty() {
        let best_index = (0..unused_columns.len())
            .map(|i| (i, decomposed.entropy_of_split(unused_columns[i])))
            .fold(None, |best: Option<(usize, f64)>, (i, h)| match best {
                Some((_, best_h)) if h.partial_cmp(&best_h) != Some(Ordering::Less) => best,
                _ => Some((i, h)),
            })
            .map(|(i, _)| i)
            .unwrap_or(0);
        let best_column = unused_columns.swap_remove(best_index);
        decomposed.split(best_column);
    }

    if unused_columns.is_empty() || decomposed.total_groups() == decomposed.total_rows() {
        return vec![f.clone()];
    }

    let decision = decomposed.to_function(variables);
    debug!(
        "decompose: {} over {} vars / {} rows -> decision over {} vars / {} rows",
        target,
        f.num_variables(),
        f.num_rows(),
        decision.num_variables(),
        decision.num_rows()
    );
    vec![decision, f.without_variable(target)]
}

/// Repeatedly decomposes the last piece on the next variable of
/// `priority_order`.
///
/// Always-true pieces are discarded, and the process stops once the last
/// piece becomes always-true.
pub fn full_decompose(f: &Function, priority_order: &[Var]) -> Vec<Function> {
    let mut result = vec![f.clone()];
    for &var in priority_order {
        let Some(last) = result.pop() else {
            break;
        };
        if !last.contains(var) {
            result.push(last);
            continue;
        }
        let mut pieces = decompose(&last, var, &HashSet::new());
        let Some(rest) = pieces.pop() else {
            break;
        };
        result.extend(pieces.into_iter().filter(|piece| !piece.is_always_true()));
        if rest.is_always_true() {
            break;
        }
        result.push(rest);
    }
    result
}
