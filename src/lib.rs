//! Decide which videos to store in which cache servers so that the latency
//! saved over a request workload is maximal.
//!
//! The pipeline runs strictly forward: an [`Instance`] is parsed, filtered into
//! a [`Relevance`], turned into a [`PlacementModel`], handed to a
//! [`MilpSolver`] and read back as a [`Placement`].

use std::fs::write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

pub mod config;
pub mod instance;
pub mod model;
pub mod placement;
pub mod relevance;
pub mod solver;

pub use config::SolverSettings;
pub use instance::{Endpoint, Instance, Request};
pub use model::{ConstraintKind, Decision, LinearConstraint, PlacementModel, VarId};
pub use placement::Placement;
pub use relevance::{Relevance, ServingOption};
pub use solver::{Assignment, CbcSolver, MilpSolver, SolveOutcome, SolveStatus};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read instance {}: {source}", path.display())]
    InstanceNotFound {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed instance at token {position}: {reason}")]
    MalformedInstance { position: usize, reason: String },
    #[error("malformed placement at line {line}: {reason}")]
    MalformedPlacement { line: usize, reason: String },
    #[error("invalid placement for cache {cache}: {reason}")]
    InvalidPlacement { cache: usize, reason: String },
    #[error("invalid solver configuration {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },
    #[error("solver error: {0}")]
    Solver(String),
    #[error("cannot write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// What a solve produced. `placement` and `objective` are only present when
/// `status` is usable.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub status: SolveStatus,
    pub objective: Option<f64>,
    pub placement: Option<Placement>,
}

/// Filters `instance` and builds its integer program.
pub fn build_model(instance: &Instance) -> PlacementModel {
    info!(
        videos = instance.video_count(),
        endpoints = instance.endpoints().len(),
        requests = instance.requests().len(),
        caches = instance.cache_count(),
        capacity = instance.cache_capacity(),
        "instance loaded"
    );

    let relevance = Relevance::compute(instance);
    debug!(
        requested = relevance.requested_videos().len(),
        placeable = relevance.placeable_videos().len(),
        serving_options = relevance.serving_options().len(),
        "relevance computed"
    );

    let model = PlacementModel::build(instance, &relevance);
    let constraints_of = |f: fn(&ConstraintKind) -> bool| {
        model.constraints().iter().filter(|c| f(&c.kind)).count()
    };
    info!(
        placement_vars = model.placement_vars().count(),
        serving_vars = model.serving_vars().count(),
        capacity = constraints_of(|k| matches!(k, ConstraintKind::Capacity { .. })),
        consistency = constraints_of(|k| matches!(k, ConstraintKind::Consistency { .. })),
        single_service = constraints_of(|k| matches!(k, ConstraintKind::SingleService { .. })),
        "model built"
    );
    model
}

/// Runs `solver` on `model` and extracts the placement.
pub fn solve_model<S: MilpSolver + ?Sized>(
    model: &PlacementModel,
    settings: &SolverSettings,
    solver: &S,
) -> Result<Report> {
    info!(
        mip_gap = settings.mip_gap,
        time_limit = settings.time_limit,
        "optimizing"
    );
    let outcome = solver.solve(model, settings)?;
    let placement = Placement::extract(model, &outcome);
    let objective = placement.as_ref().and(outcome.assignment.as_ref()).map(|a| {
        model.evaluate(|v| a.value(v))
    });
    info!(status = %outcome.status, objective, "solver finished");
    Ok(Report {
        status: outcome.status,
        objective,
        placement,
    })
}

/// Writes the placement of `report` to `path`, if there is one.
///
/// The whole output is rendered before the file is created, and nothing is
/// created when the solve produced no usable placement. Returns whether the
/// file was written.
pub fn write_placement(report: &Report, path: &Path) -> Result<bool> {
    let Some(placement) = &report.placement else {
        return Ok(false);
    };
    let rendered = placement.to_string();
    write(path, rendered).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}

/// Builds and solves `instance` in one go.
pub fn optimize<S: MilpSolver + ?Sized>(
    instance: &Instance,
    settings: &SolverSettings,
    solver: &S,
) -> Result<Report> {
    let model = build_model(instance);
    solve_model(&model, settings, solver)
}
