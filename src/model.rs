//! Solver-independent integer program for the placement problem.
//!
//! Variables are binary. `Place { cache, video }` is the Y variable: the video is
//! stored in the cache. `Serve { request, cache }` is the X variable: the request
//! is served from the cache instead of the data-center. Every constraint has the
//! form `Σ coefficient * variable <= rhs`.

use std::collections::BTreeMap;
use std::fmt;

use crate::instance::Instance;
use crate::relevance::Relevance;

/// Handle to a variable of a [`PlacementModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Place { cache: usize, video: usize },
    Serve { request: usize, cache: usize },
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Place { cache, video } => write!(f, "y_{cache}_{video}"),
            Decision::Serve { request, cache } => write!(f, "x_{request}_{cache}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Videos stored in `cache` fit in its capacity.
    Capacity { cache: usize },
    /// `request` is only served from `cache` if the cache holds its video.
    Consistency { request: usize, cache: usize },
    /// `request` is served by at most one cache.
    SingleService { request: usize },
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintKind::Capacity { cache } => write!(f, "cap_c{cache}"),
            ConstraintKind::Consistency { request, cache } => write!(f, "link_r{request}_c{cache}"),
            ConstraintKind::SingleService { request } => write!(f, "one_r{request}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub kind: ConstraintKind,
    pub terms: Vec<(VarId, f64)>,
    pub rhs: f64,
}

impl LinearConstraint {
    /// Whether `value` (indexed by variable) satisfies the constraint, with a
    /// small tolerance for solver round-off.
    pub fn is_satisfied_by(&self, value: impl Fn(VarId) -> f64) -> bool {
        let lhs: f64 = self.terms.iter().map(|&(var, coef)| coef * value(var)).sum();
        lhs <= self.rhs + 1e-6
    }
}

type CacheVideoToVariableMap = BTreeMap<(usize, usize), VarId>;
type RequestCacheToVariableMap = BTreeMap<(usize, usize), VarId>;

/// Maximisation problem: variables, objective terms and `<=` constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementModel {
    variables: Vec<Decision>,
    placement: CacheVideoToVariableMap,
    serving: RequestCacheToVariableMap,
    objective: Vec<(VarId, f64)>,
    constraints: Vec<LinearConstraint>,
}

impl PlacementModel {
    /// Builds the model for `instance`, creating only the variables `relevance`
    /// allows.
    pub fn build(instance: &Instance, relevance: &Relevance) -> Self {
        let mut model = init_variables(instance, relevance);
        model.objective = create_objective_function(relevance, &model.serving);

        constrain_cache_capacities(&mut model, instance, relevance);
        constrain_serving_to_held_videos(&mut model, instance);
        constrain_single_service(&mut model, instance, relevance);
        model
    }

    pub fn variables(&self) -> &[Decision] {
        &self.variables
    }

    pub fn decision(&self, var: VarId) -> Decision {
        self.variables[var.0]
    }

    /// The Y variable for `(cache, video)`, if it was created.
    pub fn placement_var(&self, cache: usize, video: usize) -> Option<VarId> {
        self.placement.get(&(cache, video)).copied()
    }

    /// The X variable for `(request, cache)`, if it was created.
    pub fn serving_var(&self, request: usize, cache: usize) -> Option<VarId> {
        self.serving.get(&(request, cache)).copied()
    }

    /// Y variables in creation order: by cache, then by video.
    pub fn placement_vars(&self) -> impl Iterator<Item = ((usize, usize), VarId)> + '_ {
        self.placement.iter().map(|(&key, &var)| (key, var))
    }

    /// X variables ordered by request, then by cache.
    pub fn serving_vars(&self) -> impl Iterator<Item = ((usize, usize), VarId)> + '_ {
        self.serving.iter().map(|(&key, &var)| (key, var))
    }

    pub fn objective(&self) -> &[(VarId, f64)] {
        &self.objective
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    /// Objective value of an assignment.
    pub fn evaluate(&self, value: impl Fn(VarId) -> f64) -> f64 {
        self.objective
            .iter()
            .map(|&(var, coef)| coef * value(var))
            .sum()
    }

    fn add_variable(&mut self, decision: Decision) -> VarId {
        let id = VarId(self.variables.len());
        self.variables.push(decision);
        id
    }
}

fn init_variables(instance: &Instance, relevance: &Relevance) -> PlacementModel {
    let mut model = PlacementModel {
        variables: Vec::new(),
        placement: BTreeMap::new(),
        serving: BTreeMap::new(),
        objective: Vec::new(),
        constraints: Vec::new(),
    };

    for cache in 0..instance.cache_count() {
        for &video in relevance.requested_videos() {
            if relevance.can_place(cache, video) {
                let var = model.add_variable(Decision::Place { cache, video });
                model.placement.insert((cache, video), var);
            }
        }
    }

    for option in relevance.serving_options() {
        let var = model.add_variable(Decision::Serve {
            request: option.request,
            cache: option.cache,
        });
        model.serving.insert((option.request, option.cache), var);
    }

    model
}

/// One term per X variable, weighted by the latency it saves.
fn create_objective_function(
    relevance: &Relevance,
    serving: &RequestCacheToVariableMap,
) -> Vec<(VarId, f64)> {
    relevance
        .serving_options()
        .iter()
        .map(|option| (serving[&(option.request, option.cache)], option.saving as f64))
        .collect()
}

fn constrain_cache_capacities(
    model: &mut PlacementModel,
    instance: &Instance,
    relevance: &Relevance,
) {
    for cache in 0..instance.cache_count() {
        let terms = relevance
            .requested_videos()
            .iter()
            .filter_map(|&video| {
                let size = *instance.video_sizes().get(video)?;
                model.placement_var(cache, video).map(|var| (var, size as f64))
            })
            .collect();
        model.constraints.push(LinearConstraint {
            kind: ConstraintKind::Capacity { cache },
            terms,
            rhs: instance.cache_capacity() as f64,
        });
    }
}

/// `x(r, c) - y(c, video(r)) <= 0`
fn constrain_serving_to_held_videos(model: &mut PlacementModel, instance: &Instance) {
    let links: Vec<_> = model
        .serving_vars()
        .filter_map(|((request, cache), serve)| {
            let video = instance.requests().get(request)?.video;
            model.placement_var(cache, video).map(|place| LinearConstraint {
                kind: ConstraintKind::Consistency { request, cache },
                terms: vec![(serve, 1.0), (place, -1.0)],
                rhs: 0.0,
            })
        })
        .collect();
    model.constraints.extend(links);
}

fn constrain_single_service(model: &mut PlacementModel, instance: &Instance, relevance: &Relevance) {
    for request in 0..instance.requests().len() {
        let terms: Vec<_> = relevance
            .options_for(request)
            .iter()
            .filter_map(|o| model.serving_var(o.request, o.cache))
            .map(|var| (var, 1.0))
            .collect();
        if !terms.is_empty() {
            model.constraints.push(LinearConstraint {
                kind: ConstraintKind::SingleService { request },
                terms,
                rhs: 1.0,
            });
        }
    }
}
