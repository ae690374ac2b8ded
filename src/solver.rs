//! The boundary to the external MILP solver.
//!
//! The rest of the crate only sees [`MilpSolver`], so the engine behind it can
//! be swapped without touching the model builder or the extractor.

use std::ffi::{CString, OsString};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use good_lp::solvers::SolutionStatus;
use good_lp::solvers::coin_cbc::{CoinCbcProblem, coin_cbc};
use good_lp::{Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable};
use good_lp::{WithMipGap, WithTimeLimit, variable, variables};
use tracing::{debug, info, warn};

use crate::config::SolverSettings;
use crate::model::{LinearConstraint, PlacementModel, VarId};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Proven optimal.
    Optimal,
    /// Stopped within the configured optimality gap.
    WithinGap,
    /// Stopped by the time budget with an incumbent solution.
    TimeLimitReached,
    /// No assignment satisfies the constraints.
    Infeasible,
    /// Stopped without any incumbent solution.
    NoSolution,
}

impl SolveStatus {
    /// Whether the solve produced an assignment worth reporting.
    pub fn is_usable(self) -> bool {
        matches!(
            self,
            SolveStatus::Optimal | SolveStatus::WithinGap | SolveStatus::TimeLimitReached
        )
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SolveStatus::Optimal => "optimal",
            SolveStatus::WithinGap => "within optimality gap",
            SolveStatus::TimeLimitReached => "time limit reached",
            SolveStatus::Infeasible => "infeasible",
            SolveStatus::NoSolution => "no solution within budget",
        };
        f.write_str(s)
    }
}

/// Value of every model variable, indexed by [`VarId`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    values: Vec<f64>,
}

impl Assignment {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Missing entries read as zero.
    pub fn value(&self, var: VarId) -> f64 {
        self.values.get(var.index()).copied().unwrap_or(0.0)
    }

    /// Rounds a binary value, tolerating solver slack.
    pub fn is_set(&self, var: VarId) -> bool {
        self.value(var) > 0.5
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    /// Present whenever `status.is_usable()`.
    pub assignment: Option<Assignment>,
}

impl SolveOutcome {
    pub fn solved(status: SolveStatus, assignment: Assignment) -> Self {
        Self {
            status,
            assignment: Some(assignment),
        }
    }

    pub fn unsolved(status: SolveStatus) -> Self {
        Self {
            status,
            assignment: None,
        }
    }
}

/// Anything that can maximise a [`PlacementModel`] over binary variables.
///
/// Internal solver failures are returned as [`Error::Solver`]; infeasibility is
/// a status, not an error.
pub trait MilpSolver {
    fn solve(&self, model: &PlacementModel, settings: &SolverSettings) -> Result<SolveOutcome>;
}

/// COIN-OR CBC through `good_lp`.
#[derive(Debug, Clone, Default)]
pub struct CbcSolver {
    mps_path: Option<PathBuf>,
}

impl CbcSolver {
    /// Also has CBC write the problem it is about to solve in MPS format.
    ///
    /// CBC always names the file with a `.mps` extension: `model.mps` and
    /// `model` both end up in `model.mps`, `model.lp` in `model.lp.mps`.
    pub fn with_mps_export(mut self, path: impl Into<PathBuf>) -> Self {
        self.mps_path = Some(path.into());
        self
    }
}

impl MilpSolver for CbcSolver {
    fn solve(&self, model: &PlacementModel, settings: &SolverSettings) -> Result<SolveOutcome> {
        // Nothing to decide, and CBC does not need to see an empty problem.
        if model.variables().is_empty() {
            if let Some(path) = &self.mps_path {
                warn!(path = %path.display(), "model has no variables, nothing to export");
            }
            return Ok(SolveOutcome::solved(SolveStatus::Optimal, Assignment::default()));
        }

        let (problem_vars, lp_vars) = init_variables(model);
        let objective = create_objective_function(model, &lp_vars);
        let problem = create_problem(problem_vars, objective, settings)?;
        let problem = add_constraints(problem, model.constraints(), &lp_vars);

        if let Some(path) = &self.mps_path {
            let written = export_mps(&problem, path)?;
            info!(path = %written.display(), "model written");
        }

        debug!(
            variables = lp_vars.len(),
            constraints = model.constraints().len(),
            "handing model to CBC"
        );

        match problem.solve() {
            Ok(solution) => {
                let status = match solution.status() {
                    SolutionStatus::Optimal => SolveStatus::Optimal,
                    SolutionStatus::TimeLimit => SolveStatus::TimeLimitReached,
                    _ => SolveStatus::WithinGap,
                };
                let assignment = Assignment::new(lp_vars.iter().map(|&v| solution.value(v)).collect());
                // CBC stopped by its time limit before finding an incumbent still
                // reports column values; they do not form a solution.
                if !satisfies_all(model, &assignment) {
                    return Ok(SolveOutcome::unsolved(SolveStatus::NoSolution));
                }
                Ok(SolveOutcome::solved(status, assignment))
            }
            Err(ResolutionError::Infeasible) => Ok(SolveOutcome::unsolved(SolveStatus::Infeasible)),
            Err(err) => Err(Error::Solver(err.to_string())),
        }
    }
}

/// One binary `good_lp` variable per model variable, in `VarId` order.
fn init_variables(model: &PlacementModel) -> (ProblemVariables, Vec<Variable>) {
    let mut problem_vars = variables!();
    let lp_vars = model
        .variables()
        .iter()
        .map(|decision| problem_vars.add(variable().binary().name(decision.to_string())))
        .collect();
    (problem_vars, lp_vars)
}

fn create_objective_function(model: &PlacementModel, lp_vars: &[Variable]) -> Expression {
    linear_expression(model.objective(), lp_vars)
}

fn create_problem(
    variables: ProblemVariables,
    objective: Expression,
    settings: &SolverSettings,
) -> Result<CoinCbcProblem> {
    let mut problem = variables
        .maximise(objective)
        .using(coin_cbc)
        .with_mip_gap(settings.mip_gap as f32)
        .map_err(|err| Error::Solver(format!("cannot set optimality gap: {err}")))?
        .with_time_limit(settings.time_limit);
    problem.set_parameter("logLevel", if settings.verbose { "1" } else { "0" });
    Ok(problem)
}

/// Writes `problem` through CBC's own MPS writer and returns the file it wrote.
fn export_mps(problem: &CoinCbcProblem, path: &Path) -> Result<PathBuf> {
    let io_error = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    // CBC appends the extension itself.
    let stem = if path.extension().is_some_and(|ext| ext == "mps") {
        path.with_extension("")
    } else {
        path.to_path_buf()
    };
    let c_path = CString::new(stem.as_os_str().as_encoded_bytes())
        .map_err(|err| io_error(io::Error::new(io::ErrorKind::InvalidInput, err)))?;

    problem.as_inner().to_raw().write_mps(&c_path);

    let mut written = OsString::from(stem);
    written.push(".mps");
    let written = PathBuf::from(written);
    if !written.is_file() {
        return Err(io_error(io::Error::new(
            io::ErrorKind::NotFound,
            "CBC did not write the model",
        )));
    }
    Ok(written)
}

fn add_constraints<Model: SolverModel>(
    model: Model,
    constraints: &[LinearConstraint],
    lp_vars: &[Variable],
) -> Model {
    constraints
        .iter()
        // An empty row is `0 <= rhs`, which holds for every capacity.
        .filter(|c| !c.terms.is_empty())
        .fold(model, |m, c| {
            m.with(linear_expression(&c.terms, lp_vars).leq(c.rhs))
        })
}

fn satisfies_all(model: &PlacementModel, assignment: &Assignment) -> bool {
    model
        .constraints()
        .iter()
        .all(|c| c.is_satisfied_by(|v| f64::from(u8::from(assignment.is_set(v)))))
}

fn linear_expression(terms: &[(VarId, f64)], lp_vars: &[Variable]) -> Expression {
    terms
        .iter()
        .fold(Expression::from(0.0), |sum, &(var, coef)| {
            sum + lp_vars[var.index()] * coef
        })
}
