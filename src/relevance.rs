//! Decides which decision points are worth modelling at all.
//!
//! Videos nobody requests gain nothing from caching, videos larger than a cache
//! can never be placed, and a cache that is not faster than the data-center
//! cannot save anything. None of those pairs become variables.

use std::collections::BTreeSet;

use crate::instance::Instance;

/// Serving a request from one of its endpoint's caches, and what it saves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServingOption {
    pub request: usize,
    pub cache: usize,
    /// `(fallback_latency - cache_latency) * count`
    pub saving: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relevance {
    requested_videos: BTreeSet<usize>,
    placeable_videos: BTreeSet<usize>,
    /// Ordered by request, then by cache.
    serving_options: Vec<ServingOption>,
}

impl Relevance {
    pub fn compute(instance: &Instance) -> Self {
        let requested_videos: BTreeSet<usize> =
            instance.requests().iter().map(|r| r.video).collect();

        let placeable_videos = requested_videos
            .iter()
            .copied()
            .filter(|&v| fits_in_cache(instance, v))
            .collect();

        let serving_options = instance
            .requests()
            .iter()
            .enumerate()
            .filter_map(|(request, r)| {
                let endpoint = instance.endpoints().get(r.endpoint)?;
                Some((request, r, endpoint))
            })
            .flat_map(|(request, r, endpoint)| {
                let fits = fits_in_cache(instance, r.video);
                endpoint
                    .cache_latencies
                    .iter()
                    .filter(move |&(_, &latency)| fits && latency < endpoint.fallback_latency)
                    .map(move |(&cache, &latency)| ServingOption {
                        request,
                        cache,
                        // `fallback_latency * count` is checked when parsing
                        saving: (endpoint.fallback_latency - latency) * r.count,
                    })
            })
            .collect();

        Self {
            requested_videos,
            placeable_videos,
            serving_options,
        }
    }

    /// Every video that appears in at least one request, ascending.
    pub fn requested_videos(&self) -> &BTreeSet<usize> {
        &self.requested_videos
    }

    /// Requested videos small enough to fit in a cache, ascending.
    pub fn placeable_videos(&self) -> &BTreeSet<usize> {
        &self.placeable_videos
    }

    /// Whether `video` may be stored in `cache`. Capacity is uniform, so this
    /// does not depend on the cache.
    pub fn can_place(&self, _cache: usize, video: usize) -> bool {
        self.placeable_videos.contains(&video)
    }

    pub fn serving_options(&self) -> &[ServingOption] {
        &self.serving_options
    }

    /// Serving options of a single request.
    pub fn options_for(&self, request: usize) -> &[ServingOption] {
        let start = self
            .serving_options
            .partition_point(|o| o.request < request);
        let end = self
            .serving_options
            .partition_point(|o| o.request <= request);
        &self.serving_options[start..end]
    }
}

fn fits_in_cache(instance: &Instance, video: usize) -> bool {
    instance
        .video_sizes()
        .get(video)
        .is_some_and(|&size| size <= instance.cache_capacity())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(content: &str) -> Instance {
        content.parse().unwrap()
    }

    #[test]
    fn single_request_yields_single_option() {
        let relevance = Relevance::compute(&instance("1 1 1 1 10\n5\n100 1\n0 20\n0 0 3\n"));
        assert_eq!(relevance.requested_videos().len(), 1);
        assert!(relevance.can_place(0, 0));
        assert_eq!(
            relevance.serving_options(),
            &[ServingOption {
                request: 0,
                cache: 0,
                saving: 240
            }]
        );
    }

    #[test]
    fn unrequested_videos_are_not_placeable() {
        let relevance = Relevance::compute(&instance("3 1 1 1 10\n5 5 5\n100 1\n0 20\n1 0 3\n"));
        assert_eq!(
            relevance.placeable_videos().iter().copied().collect::<Vec<_>>(),
            vec![1]
        );
        assert!(!relevance.can_place(0, 0));
        assert!(!relevance.can_place(0, 2));
    }

    #[test]
    fn oversized_video_has_no_options() {
        let relevance = Relevance::compute(&instance("2 1 2 1 10\n50 5\n100 1\n0 20\n0 0 3\n1 0 1\n"));
        assert!(relevance.requested_videos().contains(&0));
        assert!(!relevance.placeable_videos().contains(&0));
        assert!(relevance.options_for(0).is_empty());
        assert_eq!(relevance.options_for(1).len(), 1);
    }

    #[test]
    fn slower_or_equal_caches_are_skipped() {
        // cache 0 is slower than the data-center, cache 1 is equal, cache 2 is faster
        let relevance = Relevance::compute(&instance(
            "1 1 1 3 10\n5\n100 3\n0 150 1 100 2 99\n0 0 2\n",
        ));
        assert_eq!(
            relevance.serving_options(),
            &[ServingOption {
                request: 0,
                cache: 2,
                saving: 2
            }]
        );
    }

    #[test]
    fn options_are_grouped_per_request() {
        let relevance = Relevance::compute(&instance(
            "2 2 3 2 10\n5 5\n100 2\n0 10 1 50\n100 0\n0 0 1\n1 1 7\n1 0 2\n",
        ));
        let caches = |r| {
            relevance
                .options_for(r)
                .iter()
                .map(|o| o.cache)
                .collect::<Vec<_>>()
        };
        assert_eq!(caches(0), vec![0, 1]);
        assert!(caches(1).is_empty());
        assert_eq!(caches(2), vec![0, 1]);
        assert!(relevance.options_for(3).is_empty());
    }

    #[test]
    fn largest_accepted_saving_is_exact() {
        let relevance = Relevance::compute(&instance(
            "1 1 1 1 10\n5\n9223372036854775807 1\n0 0\n0 0 2\n",
        ));
        assert_eq!(relevance.serving_options()[0].saving, u64::MAX - 1);
    }
}
