use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::instance::Instance;
use crate::model::{PlacementModel, VarId};
use crate::solver::{Assignment, SolveOutcome};
use crate::{Error, Result};

/// Which videos are stored in which cache. Only non-empty caches are listed,
/// in ascending cache id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    caches: Vec<(usize, Vec<usize>)>,
}

impl Placement {
    /// Reads the placement out of a solve, if the solve produced a usable
    /// assignment.
    pub fn extract(model: &PlacementModel, outcome: &SolveOutcome) -> Option<Self> {
        if !outcome.status.is_usable() {
            return None;
        }
        outcome
            .assignment
            .as_ref()
            .map(|assignment| Self::from_assignment(model, assignment))
    }

    /// Every Y variable set to true, grouped by cache.
    pub fn from_assignment(model: &PlacementModel, assignment: &Assignment) -> Self {
        let mut caches: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for ((cache, video), var) in model.placement_vars() {
            if assignment.is_set(var) {
                caches.entry(cache).or_default().push(video);
            }
        }
        Self {
            caches: caches.into_iter().collect(),
        }
    }

    pub fn caches(&self) -> &[(usize, Vec<usize>)] {
        &self.caches
    }

    /// Videos stored in `cache`, empty if the cache is not used.
    pub fn videos_in(&self, cache: usize) -> &[usize] {
        self.caches
            .binary_search_by_key(&cache, |(c, _)| *c)
            .map(|i| self.caches[i].1.as_slice())
            .unwrap_or(&[])
    }

    /// Checks ids against `instance` and that no cache is over capacity.
    pub fn check(&self, instance: &Instance) -> Result<()> {
        let invalid = |cache, reason| Error::InvalidPlacement { cache, reason };
        for (cache, videos) in &self.caches {
            let cache = *cache;
            if cache >= instance.cache_count() {
                return Err(invalid(cache, "no such cache".to_string()));
            }
            let mut seen = BTreeSet::new();
            let mut used = 0u64;
            for &video in videos {
                let size = instance
                    .video_sizes()
                    .get(video)
                    .ok_or_else(|| invalid(cache, format!("no such video {video}")))?;
                if !seen.insert(video) {
                    return Err(invalid(cache, format!("video {video} listed twice")));
                }
                used = used
                    .checked_add(*size)
                    .ok_or_else(|| invalid(cache, "total video size overflows".to_string()))?;
            }
            if used > instance.cache_capacity() {
                return Err(invalid(
                    cache,
                    format!("holds {used} but capacity is {}", instance.cache_capacity()),
                ));
            }
        }
        Ok(())
    }

    /// Total latency saved when every request is served from the fastest
    /// connected cache holding its video.
    ///
    /// A single request's saving fits in a `u64`, their sum may not.
    pub fn savings(&self, instance: &Instance) -> u128 {
        instance
            .requests()
            .iter()
            .filter_map(|request| {
                let endpoint = instance.endpoints().get(request.endpoint)?;
                endpoint
                    .cache_latencies
                    .iter()
                    .filter(|&(&cache, &latency)| {
                        latency < endpoint.fallback_latency
                            && self.videos_in(cache).contains(&request.video)
                    })
                    .map(|(_, &latency)| {
                        u128::from(endpoint.fallback_latency - latency) * u128::from(request.count)
                    })
                    .max()
            })
            .sum()
    }

    /// The 0/1 assignment this placement stands for in `model`: its Y variables,
    /// and each request served by the eligible cache holding its video that
    /// saves the most. Videos without a Y variable in `model` are ignored.
    pub fn to_assignment(&self, instance: &Instance, model: &PlacementModel) -> Assignment {
        let mut values = vec![0.0; model.variables().len()];
        for (cache, videos) in &self.caches {
            for &video in videos {
                if let Some(var) = model.placement_var(*cache, video) {
                    values[var.index()] = 1.0;
                }
            }
        }

        let coefficients: HashMap<VarId, f64> = model.objective().iter().copied().collect();
        let mut best: BTreeMap<usize, (f64, VarId)> = BTreeMap::new();
        for ((request, cache), serve) in model.serving_vars() {
            let Some(video) = instance.requests().get(request).map(|r| r.video) else {
                continue;
            };
            let held = model
                .placement_var(cache, video)
                .is_some_and(|place| values[place.index()] > 0.5);
            let saving = coefficients.get(&serve).copied().unwrap_or(0.0);
            if held && best.get(&request).is_none_or(|&(s, _)| saving > s) {
                best.insert(request, (saving, serve));
            }
        }
        for &(_, serve) in best.values() {
            values[serve.index()] = 1.0;
        }
        Assignment::new(values)
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.caches.len())?;
        for (cache, videos) in &self.caches {
            write!(f, "{cache}")?;
            for video in videos {
                write!(f, " {video}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl FromStr for Placement {
    type Err = Error;

    fn from_str(content: &str) -> Result<Self> {
        let malformed = |line, reason: String| Error::MalformedPlacement { line, reason };
        let parse_id = |line, token: &str| {
            token
                .parse::<usize>()
                .map_err(|_| malformed(line, format!("expected an id, found `{token}`")))
        };

        let mut lines = content
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        let (first, header) = lines
            .next()
            .ok_or_else(|| malformed(1, "missing cache count".to_string()))?;
        let declared = parse_id(first, header)?;

        let mut caches: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (line, text) in lines.by_ref().take(declared) {
            let mut tokens = text.split_whitespace();
            // non-empty lines always have a first token
            let cache = parse_id(line, tokens.next().unwrap_or_default())?;
            let videos = tokens
                .map(|t| parse_id(line, t))
                .collect::<Result<Vec<_>>>()?;
            if caches.insert(cache, videos).is_some() {
                return Err(malformed(line, format!("cache {cache} listed twice")));
            }
        }
        if caches.len() != declared {
            return Err(malformed(
                first,
                format!("declares {declared} caches but lists {}", caches.len()),
            ));
        }
        if let Some((line, _)) = lines.next() {
            return Err(malformed(line, "unexpected trailing line".to_string()));
        }

        Ok(Self {
            caches: caches.into_iter().filter(|(_, v)| !v.is_empty()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relevance::Relevance;
    use crate::solver::SolveStatus;

    // Two caches of 10 MB, best placement is {0: [0, 2], 1: [1, 2]} for 3240.
    const CHOICE: &str =
        "3 2 4 2 10\n6 6 4\n100 2\n0 10 1 50\n200 1\n1 100\n0 0 10\n1 0 5\n2 1 20\n2 0 1\n";

    fn setup(content: &str) -> (Instance, PlacementModel) {
        let instance: Instance = content.parse().unwrap();
        let model = PlacementModel::build(&instance, &Relevance::compute(&instance));
        (instance, model)
    }

    fn placement(caches: &[(usize, Vec<usize>)]) -> Placement {
        Placement {
            caches: caches.to_vec(),
        }
    }

    #[test]
    fn extracts_set_placement_variables() {
        let (_, model) = setup(CHOICE);
        let mut values = vec![0.0; model.variables().len()];
        for (cache, video) in [(0, 0), (0, 2), (1, 2)] {
            values[model.placement_var(cache, video).unwrap().index()] = 0.99;
        }
        // just under the threshold
        values[model.placement_var(1, 1).unwrap().index()] = 0.4;
        let outcome = SolveOutcome::solved(SolveStatus::TimeLimitReached, Assignment::new(values));

        let extracted = Placement::extract(&model, &outcome).unwrap();
        assert_eq!(extracted, placement(&[(0, vec![0, 2]), (1, vec![2])]));
        assert_eq!(extracted.to_string(), "2\n0 0 2\n1 2\n");
    }

    #[test]
    fn nothing_to_extract_without_usable_solution() {
        let (_, model) = setup(CHOICE);
        let outcome = SolveOutcome::unsolved(SolveStatus::Infeasible);
        assert_eq!(Placement::extract(&model, &outcome), None);
    }

    #[test]
    fn empty_placement_renders_zero() {
        let (_, model) = setup("1 1 1 0 10\n5\n100 0\n0 0 3\n");
        let outcome = SolveOutcome::solved(SolveStatus::Optimal, Assignment::default());
        let extracted = Placement::extract(&model, &outcome).unwrap();
        assert_eq!(extracted.to_string(), "0\n");
    }

    #[test]
    fn parses_rendered_placement() {
        let parsed: Placement = "2\n0 0 2\n1 1 2\n".parse().unwrap();
        assert_eq!(parsed, placement(&[(0, vec![0, 2]), (1, vec![1, 2])]));
        assert_eq!(parsed.videos_in(1), &[1, 2]);
        assert!(parsed.videos_in(5).is_empty());
        assert_eq!(parsed.to_string().parse::<Placement>().unwrap(), parsed);
    }

    #[test]
    fn rejects_malformed_placements() {
        for content in ["", "x\n", "2\n0 1\n", "1\n0 a\n", "2\n0 1\n0 2\n", "1\n0 1\n1 2\n"] {
            let err = content.parse::<Placement>().unwrap_err();
            assert!(
                matches!(err, Error::MalformedPlacement { .. }),
                "{content:?}: {err}"
            );
        }
    }

    #[test]
    fn check_enforces_capacity_and_ids() {
        let (instance, _) = setup(CHOICE);
        assert!(placement(&[(0, vec![0, 2]), (1, vec![1, 2])]).check(&instance).is_ok());
        for bad in [
            placement(&[(0, vec![0, 1])]),
            placement(&[(2, vec![0])]),
            placement(&[(0, vec![3])]),
            placement(&[(0, vec![2, 2])]),
        ] {
            assert!(matches!(
                bad.check(&instance),
                Err(Error::InvalidPlacement { .. })
            ));
        }
    }

    #[test]
    fn savings_use_best_holding_cache() {
        let (instance, _) = setup(CHOICE);
        assert_eq!(placement(&[]).savings(&instance), 0);
        assert_eq!(
            placement(&[(0, vec![0, 2]), (1, vec![1, 2])]).savings(&instance),
            900 + 250 + 2000 + 90
        );
        assert_eq!(
            placement(&[(0, vec![0, 2]), (1, vec![0, 2])]).savings(&instance),
            900 + 2000 + 90
        );
    }

    #[test]
    fn check_rejects_total_size_overflow() {
        let (instance, _) =
            setup("2 1 1 1 18446744073709551615\n18446744073709551615 1\n100 1\n0 20\n0 0 3\n");
        assert!(placement(&[(0, vec![0])]).check(&instance).is_ok());
        match placement(&[(0, vec![0, 1])]).check(&instance) {
            Err(Error::InvalidPlacement { cache, reason }) => {
                assert_eq!(cache, 0);
                assert!(reason.contains("overflows"), "{reason}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn savings_beyond_u64_are_exact() {
        let (instance, _) = setup("1 1 2 1 10\n5\n9223372036854775807 1\n0 0\n0 0 2\n0 0 2\n");
        let saving = u128::from(u64::MAX - 1);
        assert_eq!(placement(&[(0, vec![0])]).savings(&instance), 2 * saving);
    }

    #[test]
    fn round_trip_satisfies_model() {
        let (instance, model) = setup(CHOICE);
        let chosen = placement(&[(0, vec![0, 2]), (1, vec![1, 2])]);
        let assignment = chosen.to_assignment(&instance, &model);

        for (cache, videos) in chosen.caches() {
            for &video in videos {
                assert!(assignment.is_set(model.placement_var(*cache, video).unwrap()));
            }
        }
        for constraint in model.constraints() {
            assert!(constraint.is_satisfied_by(|v| assignment.value(v)), "{}", constraint.kind);
        }
        assert_eq!(
            model.evaluate(|v| assignment.value(v)),
            chosen.savings(&instance) as f64
        );
        assert_eq!(Placement::from_assignment(&model, &assignment), chosen);
    }
}
