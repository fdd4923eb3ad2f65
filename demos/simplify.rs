use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use log::{debug, info, warn};

use dnf_rs::function::Function;
use dnf_rs::io::{parse_dimacs, Cnf, Instance};
use dnf_rs::problem::{FunctionId, Problem, ProblemConfig};

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Input problem (`.dnf` or `.cnf`).
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Write the simplified problem as DIMACS CNF.
    #[clap(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Rewrite this DIMACS CNF with the learned knowledge.
    #[clap(long, value_name = "FILE")]
    apply_to: Option<PathBuf>,

    /// Where to write the rewritten `--apply-to` CNF (default: `<FILE>.reduced.cnf`).
    #[clap(long, value_name = "FILE", requires = "apply_to")]
    reduced: Option<PathBuf>,

    /// Row-count product ceiling for merges.
    #[clap(long, value_name = "INT", default_value = "4096")]
    merge_limit: usize,

    /// Minimum number of pieces for a partition to be applied.
    #[clap(long, value_name = "INT", default_value = "2")]
    partition_limit: usize,

    /// Maximum number of merge rounds.
    #[clap(long, value_name = "INT", default_value = "1000")]
    rounds: usize,

    /// Log level.
    #[clap(long, value_name = "LEVEL", default_value = "info")]
    log_level: simplelog::LevelFilter,
}

/// Whether `second` is a better merge candidate than `first`.
///
/// Large tables go first; otherwise prefer fewer variables, then more rows.
fn second_better(first: &Function, second: &Function) -> bool {
    if first.num_rows() > 100 || second.num_rows() > 100 {
        return first.num_rows() > second.num_rows();
    }
    match first.num_variables().cmp(&second.num_variables()) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => first.num_rows() > second.num_rows(),
    }
}

fn pick(problem: &Problem, exclude: Option<FunctionId>) -> Option<(FunctionId, &Function)> {
    let mut best: Option<(FunctionId, &Function)> = None;
    for (id, f) in problem.functions() {
        if Some(id) == exclude {
            continue;
        }
        best = match best {
            Some((_, current)) if !second_better(current, f) => best,
            _ => Some((id, f)),
        };
    }
    best
}

/// Merges the two functions preferred by [`second_better`].
///
/// Returns `false` if there is no pair left or the merge would exceed the
/// merge limit.
fn heuristic_merge(problem: &mut Problem) -> bool {
    let Some((first, f)) = pick(problem, None) else {
        return false;
    };
    let Some((second, g)) = pick(problem, Some(first)) else {
        return false;
    };
    if f.num_rows().saturating_mul(g.num_rows()) > problem.config().merge_limit {
        info!("Next merge ({} x {} rows) exceeds the merge limit", f.num_rows(), g.num_rows());
        return false;
    }
    problem.merge_functions(first, second);
    true
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Cli::parse();

    simplelog::TermLogger::init(
        args.log_level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let time_total = Instant::now();
    println!("args = {:?}", args);

    let instance = Instance::load(&args.input)?;
    let total_variables = instance.total_variables;
    let config = ProblemConfig::default()
        .with_merge_limit(args.merge_limit)
        .with_partition_limit(args.partition_limit);
    let mut problem = instance.into_problem(config);
    println!("{}", problem.stats());
    println!("Problem load complete");

    problem.knowledge_propagate();
    print!("{}", problem.knowledge());
    println!("{}", problem.stats());
    println!("Finished normal propagate");

    problem.assume_and_learn();
    problem.partition();
    println!("{}", problem.stats());
    println!("Finished first assume-and-learn");

    for round in 0..args.rounds {
        if problem.is_empty() || problem.is_unsat() {
            break;
        }
        problem.collapse_duplicates();
        problem.merge_subsumed();
        problem.extract_variables();
        if !problem.propagate() {
            break;
        }
        if !heuristic_merge(&mut problem) {
            break;
        }
        problem.propagate();
        problem.assume_and_learn();
        debug!("Round {}: {}", round, problem.stats());
    }
    println!("Finished merge+assume-and-learn");

    if let Err(problems) = problem.sanity_check() {
        for p in problems {
            warn!("{}", p);
        }
    }

    print!("{}", problem.knowledge());
    println!("{}", problem.stats());

    if let Some(output) = &args.output {
        let cnf = Cnf::from_problem(&problem, total_variables)?;
        cnf.save(output)?;
        println!("Wrote {} clauses to {}", cnf.clauses().len(), output.display());
    }

    if let Some(apply_to) = &args.apply_to {
        let (num_variables, clauses) = parse_dimacs(&std::fs::read_to_string(apply_to)?)?;
        let before = clauses.len();
        let cnf = Cnf::from_clauses_with_knowledge(num_variables, clauses, problem.knowledge());
        let reduced = args.reduced.clone().unwrap_or_else(|| apply_to.with_extension("reduced.cnf"));
        cnf.save(&reduced)?;
        println!(
            "Reduced {} clauses of {} to {} in {}",
            before,
            apply_to.display(),
            cnf.clauses().len(),
            reduced.display()
        );
    }

    println!("Total time: {:.2} s", time_total.elapsed().as_secs_f64());

    Ok(())
}
