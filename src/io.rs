//! Loading problems and writing them back as CNF.
//!
//! # DNF Format (.dnf)
//!
//! ```text
//! p dnf <total_variables> <total_functions>
//! <ignored line>
//! * Big integer: <patterns>, Block size = <n>   # starts a block
//! <var_1> ... <var_n>                           # one function per line
//! ```
//!
//! Every set bit `p` of `<patterns>` is one row of the block, in which the
//! `i`-th listed variable takes bit `i` of `p`.
//!
//! # CNF Format (.cnf)
//!
//! Standard DIMACS: a `p cnf <vars> <clauses>` header, `c` comment lines,
//! and clauses as signed literals terminated by `0`. Each clause is loaded
//! as the function accepting every assignment but the one it forbids.
//! [`Cnf::from_clauses_with_knowledge`] instead rewrites the clauses of such a
//! file with learned [`Knowledge`].

use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as FmtWrite;
use std::fs;
use std::io;
use std::path::Path;

use log::debug;
use num_bigint::BigUint;

use crate::function::{Function, MAX_ENUMERATED_VARIABLES};
use crate::knowledge::Knowledge;
use crate::problem::{Problem, ProblemConfig};
use crate::types::{Lit, Var};

/// Error type for I/O operations.
#[derive(Debug)]
pub enum IoError {
    /// File I/O error.
    Io(io::Error),
    /// Parse error with message.
    Parse(String),
}

impl From<io::Error> for IoError {
    fn from(e: io::Error) -> Self {
        IoError::Io(e)
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::Io(e) => write!(f, "I/O error: {}", e),
            IoError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for IoError {}

fn parse_error(msg: impl Into<String>) -> IoError {
    IoError::Parse(msg.into())
}

/// A loaded problem: the declared variable count and one function per block
/// or clause.
#[derive(Debug, Clone)]
pub struct Instance {
    pub total_variables: usize,
    pub functions: Vec<Function>,
}

impl Instance {
    /// Reads a problem file, choosing the format by extension.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use dnf_rs::io::Instance;
    ///
    /// let instance = Instance::load("input.dnf").unwrap();
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| parse_error(format!("Problem file '{}' missing extension", path.display())))?;
        match extension {
            "dnf" => Self::from_dnf_str(&fs::read_to_string(path)?),
            "cnf" => Self::from_cnf_str(&fs::read_to_string(path)?),
            other => Err(parse_error(format!("Bad problem file extension: '{}'", other))),
        }
    }

    /// Parses the DNF block format.
    pub fn from_dnf_str(content: &str) -> Result<Self, IoError> {
        let mut lines = content.lines();

        // Parse header
        let header = lines.next().ok_or_else(|| parse_error("Missing header"))?;
        let parts: Vec<&str> = header.split_whitespace().collect();
        if parts.len() != 4 || parts[0] != "p" || parts[1] != "dnf" {
            return Err(parse_error(format!("Invalid header: {}", header)));
        }
        let total_variables: usize = parts[2].parse().map_err(|_| parse_error("Invalid variable count"))?;
        let total_functions: usize = parts[3].parse().map_err(|_| parse_error("Invalid function count"))?;

        // Second line carries nothing we use
        lines.next();

        let mut block: Option<(BigUint, usize)> = None;
        let mut functions = Vec::with_capacity(total_functions);
        for line in lines.map(str::trim).filter(|line| !line.is_empty()) {
            if line.starts_with('*') {
                block = Some(parse_block_header(line)?);
                continue;
            }

            let (patterns, size) = block
                .as_ref()
                .ok_or_else(|| parse_error(format!("Variables before any block header: {}", line)))?;
            let variables = parse_variables(line, total_variables)?;
            if variables.len() != *size {
                return Err(parse_error(format!(
                    "Block size {} does not match {} listed variables",
                    size,
                    variables.len()
                )));
            }
            if *size < 64 && patterns.bits() > 1u64 << *size {
                return Err(parse_error(format!("Patterns {} exceed block size {}", patterns, size)));
            }
            functions.push(Function::from_patterns(variables, patterns));
        }

        if functions.len() != total_functions {
            return Err(parse_error(format!(
                "Header declares {} functions, found {}",
                total_functions,
                functions.len()
            )));
        }
        debug!("Loaded {} DNF functions over {} variables", functions.len(), total_variables);

        Ok(Self {
            total_variables,
            functions,
        })
    }

    /// Parses DIMACS CNF.
    pub fn from_cnf_str(content: &str) -> Result<Self, IoError> {
        let (total_variables, clauses) = parse_dimacs(content)?;

        let mut functions = Vec::with_capacity(clauses.len());
        for clause in &clauses {
            if clause.len() > MAX_ENUMERATED_VARIABLES {
                return Err(parse_error(format!("Clause with {} literals is too wide", clause.len())));
            }
            functions.push(Function::from_clause(clause));
        }
        debug!("Loaded {} CNF clauses over {} variables", functions.len(), total_variables);

        Ok(Self {
            total_variables,
            functions,
        })
    }

    pub fn into_problem(self, config: ProblemConfig) -> Problem {
        Problem::from_functions(config, self.functions)
    }
}

/// Parses DIMACS CNF into the declared variable count and the clauses as
/// written.
pub fn parse_dimacs(content: &str) -> Result<(usize, Vec<Vec<Lit>>), IoError> {
    let mut header: Option<(usize, usize)> = None;
    let mut clauses: Vec<Vec<Lit>> = Vec::new();
    let mut current: Vec<Lit> = Vec::new();

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('c') {
            continue;
        }
        if line.starts_with('%') {
            break;
        }
        if line.starts_with('p') {
            if header.is_some() {
                return Err(parse_error("Duplicate header"));
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() != 4 || parts[0] != "p" || parts[1] != "cnf" {
                return Err(parse_error(format!("Invalid header: {}", line)));
            }
            let num_variables = parts[2].parse().map_err(|_| parse_error("Invalid variable count"))?;
            let num_clauses = parts[3].parse().map_err(|_| parse_error("Invalid clause count"))?;
            header = Some((num_variables, num_clauses));
            continue;
        }

        let Some((num_variables, _)) = header else {
            return Err(parse_error("Clause before header"));
        };
        for token in line.split_whitespace() {
            let lit: i32 = token
                .parse()
                .map_err(|_| parse_error(format!("Invalid literal: {}", token)))?;
            if lit == 0 {
                clauses.push(std::mem::take(&mut current));
                continue;
            }
            if lit.unsigned_abs() as usize > num_variables {
                return Err(parse_error(format!("Literal {} exceeds declared {} variables", lit, num_variables)));
            }
            current.push(Lit::from_dimacs(lit));
        }
    }
    if !current.is_empty() {
        clauses.push(current);
    }

    let (num_variables, num_clauses) = header.ok_or_else(|| parse_error("Missing header"))?;
    if clauses.len() != num_clauses {
        return Err(parse_error(format!(
            "Header declares {} clauses, found {}",
            num_clauses,
            clauses.len()
        )));
    }
    Ok((num_variables, clauses))
}

/// Parses `* Big integer: <patterns>, Block size = <n>`.
fn parse_block_header(line: &str) -> Result<(BigUint, usize), IoError> {
    let invalid = || parse_error(format!("Invalid block header: {}", line));

    let (_, rest) = line.split_once("integer:").ok_or_else(invalid)?;
    let (number, rest) = rest.split_once(',').ok_or_else(invalid)?;
    let patterns: BigUint = number.trim().parse().map_err(|_| invalid())?;
    let (_, size) = rest.rsplit_once('=').ok_or_else(invalid)?;
    let size: usize = size.trim().parse().map_err(|_| invalid())?;

    Ok((patterns, size))
}

fn parse_variables(line: &str, total_variables: usize) -> Result<Vec<Var>, IoError> {
    let mut seen = HashSet::new();
    let mut variables = Vec::new();
    for token in line.split_whitespace() {
        let id: u32 = token
            .parse()
            .map_err(|_| parse_error(format!("Invalid variable: {}", token)))?;
        if id == 0 || id as usize > total_variables {
            return Err(parse_error(format!("Variable {} out of range 1..={}", id, total_variables)));
        }
        if !seen.insert(id) {
            return Err(parse_error(format!("Duplicate variable {} in: {}", id, line)));
        }
        variables.push(Var::new(id));
    }
    Ok(variables)
}

/// A clause set ready to be written as DIMACS.
#[derive(Debug, Clone, Default)]
pub struct Cnf {
    num_variables: usize,
    clauses: Vec<Vec<Lit>>,
}

impl Cnf {
    /// Builds a clause set from `clauses`, removing duplicates and running one
    /// subsumption pass.
    pub fn new(num_variables: usize, clauses: impl IntoIterator<Item = Vec<Lit>>) -> Self {
        let mut set: BTreeSet<Vec<Lit>> = BTreeSet::new();
        let mut num_variables = num_variables;
        for mut clause in clauses {
            clause.sort_unstable();
            clause.dedup();
            if let Some(max) = clause.iter().map(|lit| lit.var().id() as usize).max() {
                num_variables = num_variables.max(max);
            }
            set.insert(clause);
        }

        let before = set.len();
        subsume_flipped(&mut set);
        debug!("Cnf: {} unique clauses, {} after subsumption", before, set.len());

        Self {
            num_variables,
            clauses: set.into_iter().collect(),
        }
    }

    /// Exports the live functions and the knowledge of `problem`.
    ///
    /// An unsatisfiable problem is written as the single empty clause.
    pub fn from_problem(problem: &Problem, num_variables: usize) -> Result<Self, IoError> {
        if problem.is_unsat() {
            return Ok(Self::new(num_variables, [Vec::new()]));
        }

        let mut clauses = Vec::new();
        for (id, f) in problem.functions() {
            if f.num_variables() > MAX_ENUMERATED_VARIABLES {
                return Err(parse_error(format!(
                    "Function {} over {} variables is too wide to write as CNF",
                    id,
                    f.num_variables()
                )));
            }
            clauses.extend(f.to_clauses());
        }
        clauses.extend(problem.knowledge().to_clauses());

        Ok(Self::new(num_variables, clauses))
    }

    /// Rewrites `clauses` with the facts of `knowledge`.
    ///
    /// Rewritten variables are replaced by their representative, with the
    /// rule's sign. A clause containing a literal made true by an assignment,
    /// or both signs of a variable after rewriting, is dropped. Literals made
    /// false are removed. An unsatisfiable `knowledge` yields the single empty
    /// clause.
    pub fn from_clauses_with_knowledge(
        num_variables: usize,
        clauses: impl IntoIterator<Item = Vec<Lit>>,
        knowledge: &Knowledge,
    ) -> Self {
        if knowledge.is_unsat() {
            return Self::new(num_variables, [Vec::new()]);
        }

        let mut reduced: Vec<Vec<Lit>> = Vec::new();
        let mut satisfied = 0;
        'clauses: for clause in clauses {
            let mut kept: BTreeSet<Lit> = BTreeSet::new();
            for lit in clause {
                let lit = match knowledge.rewrite(lit.var()) {
                    Some(rule) => Lit::new(rule.to, lit.is_negated() != rule.negated),
                    None => lit,
                };
                if let Some(value) = knowledge.assignment(lit.var()) {
                    if lit.is_satisfied_by(value) {
                        satisfied += 1;
                        continue 'clauses;
                    }
                    continue;
                }
                if kept.contains(&-lit) {
                    satisfied += 1;
                    continue 'clauses;
                }
                kept.insert(lit);
            }
            reduced.push(kept.into_iter().collect());
        }
        debug!("Knowledge satisfies {} clauses, {} remain", satisfied, reduced.len());

        Self::new(num_variables, reduced)
    }

    pub fn num_variables(&self) -> usize {
        self.num_variables
    }
    pub fn clauses(&self) -> &[Vec<Lit>] {
        &self.clauses
    }

    pub fn to_dimacs_string(&self) -> String {
        let mut output = String::new();
        writeln!(output, "p cnf {} {}", self.num_variables, self.clauses.len()).unwrap();
        for clause in &self.clauses {
            for lit in clause {
                write!(output, "{} ", lit).unwrap();
            }
            writeln!(output, "0").unwrap();
        }
        output
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), IoError> {
        fs::write(path, self.to_dimacs_string())?;
        Ok(())
    }
}

/// One pass over `clauses`: whenever flipping a single literal of a clause
/// yields another clause of the set, both are replaced by the clause without
/// that literal.
fn subsume_flipped(clauses: &mut BTreeSet<Vec<Lit>>) {
    let snapshot: Vec<Vec<Lit>> = clauses.iter().cloned().collect();
    for clause in snapshot {
        if !clauses.contains(&clause) {
            continue;
        }
        for i in 0..clause.len() {
            let mut flipped = clause.clone();
            flipped[i] = -flipped[i];
            if !clauses.contains(&flipped) {
                continue;
            }
            clauses.remove(&clause);
            clauses.remove(&flipped);
            let mut shorter = clause.clone();
            shorter.remove(i);
            clauses.insert(shorter);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::function::tests::vars;
    use crate::knowledge::Equivalence;
    use crate::types::Value::{False as F, True as T};

    fn lits(dimacs: &[i32]) -> Vec<Lit> {
        dimacs.iter().map(|&lit| Lit::from_dimacs(lit)).collect()
    }

    #[test]
    fn test_dnf_single_block() {
        let content = "p dnf 3 1\nignored\n* Big integer: 5, Block size = 2\n1 2\n";
        let instance = Instance::from_dnf_str(content).unwrap();
        assert_eq!(instance.total_variables, 3);
        assert_eq!(instance.functions.len(), 1);
        let f = &instance.functions[0];
        assert_eq!(f.variables(), &vars(&[1, 2])[..]);
        assert_eq!(f.rows(), &[vec![F, F], vec![F, T]]);
    }

    #[test]
    fn test_dnf_block_reused() {
        let content = "p dnf 4 2\n\n******* Big integer: 6, Block size = 2\n1 2\n3 4\n";
        let instance = Instance::from_dnf_str(content).unwrap();
        assert_eq!(instance.functions.len(), 2);
        assert_eq!(instance.functions[1].variables(), &vars(&[3, 4])[..]);
        assert_eq!(instance.functions[1].rows(), &[vec![F, T], vec![T, F]]);
    }

    #[test]
    fn test_dnf_big_patterns() {
        // 2^70 needs 71 bits
        let content = "p dnf 7 1\n\n* Big integer: 1180591620717411303424, Block size = 7\n1 2 3 4 5 6 7\n";
        let instance = Instance::from_dnf_str(content).unwrap();
        let f = &instance.functions[0];
        // 70 = 0b1000110
        assert_eq!(f.rows(), &[vec![F, T, T, F, F, F, T]]);
    }

    #[test]
    fn test_dnf_errors() {
        let cases = [
            "",
            "p cnf 3 1\n\n",
            "p dnf x 1\n\n",
            "p dnf 3 1\n\n1 2\n",
            "p dnf 3 1\n\n* Big integer: 5, Block size = 3\n1 2\n",
            "p dnf 3 1\n\n* Big integer: 5, Block size = 2\n1 4\n",
            "p dnf 3 1\n\n* Big integer: 5, Block size = 2\n0 1\n",
            "p dnf 3 1\n\n* Big integer: 5, Block size = 2\n1 1\n",
            "p dnf 3 2\n\n* Big integer: 5, Block size = 2\n1 2\n",
            "p dnf 3 1\n\n* Big integer: 17, Block size = 2\n1 2\n",
            "p dnf 3 1\n\n* Big integer 5 Block size 2\n1 2\n",
        ];
        for content in cases {
            match Instance::from_dnf_str(content) {
                Err(IoError::Parse(_)) => {}
                other => panic!("Expected parse error for {:?}, got {:?}", content, other),
            }
        }
    }

    #[test]
    fn test_cnf_clauses() {
        let content = "c comment\np cnf 3 2\n1 -2 0\n-3\n0\n";
        let instance = Instance::from_cnf_str(content).unwrap();
        assert_eq!(instance.total_variables, 3);
        assert_eq!(instance.functions.len(), 2);
        assert_eq!(instance.functions[0].num_rows(), 3);
        assert_eq!(instance.functions[1].variables(), &vars(&[3])[..]);
        assert_eq!(instance.functions[1].rows(), &[vec![F]]);
    }

    #[test]
    fn test_cnf_errors() {
        let cases = ["1 2 0\n", "p cnf 2 1\n1 3 0\n", "p cnf 2 2\n1 2 0\n", "p cnf 2 1\n1 a 0\n", "p cnf 2 1\np cnf 2 1\n"];
        for content in cases {
            match Instance::from_cnf_str(content) {
                Err(IoError::Parse(_)) => {}
                other => panic!("Expected parse error for {:?}, got {:?}", content, other),
            }
        }
    }

    #[test]
    fn test_load_rejects_extension() {
        assert!(matches!(Instance::load("problem.txt"), Err(IoError::Parse(_))));
        assert!(matches!(Instance::load("problem"), Err(IoError::Parse(_))));
        assert!(matches!(Instance::load("/nonexistent/problem.dnf"), Err(IoError::Io(_))));
    }

    #[test]
    fn test_cnf_dedup_and_subsumption() {
        let cnf = Cnf::new(2, [lits(&[1, 2]), lits(&[2, 1]), lits(&[1, -2])]);
        assert_eq!(cnf.clauses(), &[lits(&[1])]);
        assert_eq!(cnf.to_dimacs_string(), "p cnf 2 1\n1 0\n");
    }

    #[test]
    fn test_cnf_subsumption_single_pass() {
        let cnf = Cnf::new(3, [lits(&[1, 2, 3]), lits(&[1, 2, -3]), lits(&[-1, 3])]);
        assert_eq!(cnf.clauses(), &[lits(&[1, 2]), lits(&[-1, 3])]);
    }

    #[test]
    fn test_cnf_from_problem() {
        let f = Function::from_bools(vars(&[1, 2]), vec![vec![true, true], vec![false, false]]);
        let problem = Problem::from_functions(ProblemConfig::default(), [f]);
        let cnf = Cnf::from_problem(&problem, 2).unwrap();
        assert_eq!(cnf.to_dimacs_string(), "p cnf 2 2\n1 -2 0\n-1 2 0\n");
    }

    #[test]
    fn test_cnf_from_unsat_problem() {
        let mut problem = Problem::from_functions(
            ProblemConfig::default(),
            [Function::from_clause(&lits(&[1])), Function::from_clause(&lits(&[-1]))],
        );
        assert!(!problem.knowledge_propagate());
        let cnf = Cnf::from_problem(&problem, 1).unwrap();
        assert_eq!(cnf.to_dimacs_string(), "p cnf 1 1\n0\n");
    }

    #[test]
    fn test_parse_dimacs_keeps_clauses_as_written() {
        let (num_variables, clauses) = parse_dimacs("p cnf 3 3\n2 -1 0\n2 -1 0 3\n0\n").unwrap();
        assert_eq!(num_variables, 3);
        assert_eq!(clauses, vec![lits(&[2, -1]), lits(&[2, -1]), lits(&[3])]);
    }

    /// x1 is true and x5 = ¬x2.
    fn learned() -> Knowledge {
        let mut knowledge = Knowledge::new();
        knowledge.assign(Var::new(1), true);
        knowledge.equate(Equivalence::new(Var::new(5), Var::new(2), true));
        knowledge
    }

    fn reduce(clause: &[i32]) -> Vec<Vec<Lit>> {
        Cnf::from_clauses_with_knowledge(5, [lits(clause)], &learned()).clauses().to_vec()
    }

    #[test]
    fn test_knowledge_drops_satisfied_clause() {
        assert_eq!(reduce(&[1, 3]), Vec::<Vec<Lit>>::new());
        assert_eq!(reduce(&[3, 1, -4]), Vec::<Vec<Lit>>::new());
    }

    #[test]
    fn test_knowledge_removes_falsified_literal() {
        assert_eq!(reduce(&[-1, 3]), vec![lits(&[3])]);
        assert_eq!(reduce(&[-1]), vec![Vec::new()]);
    }

    #[test]
    fn test_knowledge_rewrites_to_representative() {
        assert_eq!(reduce(&[5, 3]), vec![lits(&[-2, 3])]);
        assert_eq!(reduce(&[-5, 3]), vec![lits(&[2, 3])]);
        assert_eq!(reduce(&[-1, -5]), vec![lits(&[2])]);
    }

    #[test]
    fn test_knowledge_with_representative_in_clause() {
        // x5 becomes ¬x2, already present
        assert_eq!(reduce(&[5, -2, 3]), vec![lits(&[-2, 3])]);
        // x5 ∨ x2 is ¬x2 ∨ x2
        assert_eq!(reduce(&[5, 2, 3]), Vec::<Vec<Lit>>::new());
        assert_eq!(reduce(&[-5, -2]), Vec::<Vec<Lit>>::new());
    }

    #[test]
    fn test_knowledge_over_clause_set() {
        let clauses = [lits(&[1, 3]), lits(&[-1, 3, 4]), lits(&[5, 4]), lits(&[2, 2, 3]), lits(&[-5, 2])];
        let cnf = Cnf::from_clauses_with_knowledge(5, clauses, &learned());
        // ¬x5 ∨ x2 collapses to x2
        assert_eq!(cnf.to_dimacs_string(), "p cnf 5 4\n2 0\n2 3 0\n-2 4 0\n3 4 0\n");
    }

    #[test]
    fn test_unsat_knowledge_is_empty_clause() {
        let cnf = Cnf::from_clauses_with_knowledge(2, [lits(&[1, 2])], &Knowledge::unsat());
        assert_eq!(cnf.to_dimacs_string(), "p cnf 2 1\n0\n");
    }
}
