use std::collections::BTreeMap;
use std::fs::read_to_string;
use std::path::Path;
use std::str::{FromStr, SplitWhitespace};

use crate::{Error, Result};

/// One problem file: videos, endpoints, requests and a uniform cache fleet.
///
/// Only built by parsing, so every id it holds is in range and every
/// `fallback_latency * count` product fits in a `u64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    video_sizes: Vec<u64>,
    endpoints: Vec<Endpoint>,
    requests: Vec<Request>,
    cache_count: usize,
    cache_capacity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Latency to the origin data-center, always usable.
    pub fallback_latency: u64,
    /// Latency to each connected cache, keyed by cache id.
    pub cache_latencies: BTreeMap<usize, u64>,
}

/// A request pattern: `count` requests for `video` coming from `endpoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub video: usize,
    pub endpoint: usize,
    pub count: u64,
}

impl Instance {
    /// Reads and parses an instance file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = read_to_string(path).map_err(|source| Error::InstanceNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        content.parse()
    }

    /// Size of each video, indexed by video id.
    pub fn video_sizes(&self) -> &[u64] {
        &self.video_sizes
    }

    pub fn video_count(&self) -> usize {
        self.video_sizes.len()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Number of cache servers. Caches are identified by `0..cache_count`.
    pub fn cache_count(&self) -> usize {
        self.cache_count
    }

    /// Capacity shared by every cache server.
    pub fn cache_capacity(&self) -> u64 {
        self.cache_capacity
    }

    /// Latency of `endpoint` to `cache`, if they are connected.
    pub fn cache_latency(&self, endpoint: usize, cache: usize) -> Option<u64> {
        self.endpoints
            .get(endpoint)
            .and_then(|e| e.cache_latencies.get(&cache).copied())
    }
}

impl FromStr for Instance {
    type Err = Error;

    fn from_str(content: &str) -> Result<Self> {
        let mut tokens = Tokens::new(content);

        let video_count = tokens.next_count("video count")?;
        let endpoint_count = tokens.next_count("endpoint count")?;
        let request_count = tokens.next_count("request count")?;
        let cache_count = tokens.next_count("cache count")?;
        let cache_capacity = tokens.next_u64("cache capacity")?;

        let video_sizes = (0..video_count)
            .map(|_| tokens.next_u64("video size"))
            .collect::<Result<Vec<_>>>()?;

        let endpoints = (0..endpoint_count)
            .map(|_| {
                let fallback_latency = tokens.next_u64("endpoint fallback latency")?;
                let connections = tokens.next_count("endpoint connection count")?;
                let mut cache_latencies = BTreeMap::new();
                for _ in 0..connections {
                    let cache = tokens.next_index("cache id", cache_count)?;
                    let latency = tokens.next_u64("cache latency")?;
                    cache_latencies.insert(cache, latency);
                }
                Ok(Endpoint {
                    fallback_latency,
                    cache_latencies,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let requests = (0..request_count)
            .map(|_| {
                let video = tokens.next_index("request video id", video_count)?;
                let endpoint = tokens.next_index("request endpoint id", endpoint_count)?;
                let count = tokens.next_u64("request count")?;
                // Savings are at most `fallback_latency * count`.
                if endpoints[endpoint].fallback_latency.checked_mul(count).is_none() {
                    return Err(tokens.malformed_previous(format!(
                        "request count {count} overflows the latency saved at endpoint {endpoint}"
                    )));
                }
                Ok(Request {
                    video,
                    endpoint,
                    count,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Instance {
            video_sizes,
            endpoints,
            requests,
            cache_count,
            cache_capacity,
        })
    }
}

/// Whitespace token stream that remembers how far it got, for error reporting.
struct Tokens<'a> {
    inner: SplitWhitespace<'a>,
    position: usize,
}

impl<'a> Tokens<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            inner: content.split_whitespace(),
            position: 0,
        }
    }

    fn malformed(&self, reason: String) -> Error {
        Error::MalformedInstance {
            position: self.position,
            reason,
        }
    }

    /// Error about the token just consumed.
    fn malformed_previous(&self, reason: String) -> Error {
        Error::MalformedInstance {
            position: self.position.saturating_sub(1),
            reason,
        }
    }

    fn next_u64(&mut self, field: &str) -> Result<u64> {
        let token = self
            .inner
            .next()
            .ok_or_else(|| self.malformed(format!("unexpected end of input, expected {field}")))?;
        let value = token
            .parse::<u64>()
            .map_err(|_| self.malformed(format!("expected {field}, found `{token}`")))?;
        self.position += 1;
        Ok(value)
    }

    fn next_count(&mut self, field: &str) -> Result<usize> {
        let value = self.next_u64(field)?;
        usize::try_from(value).map_err(|_| self.malformed(format!("{field} {value} is too large")))
    }

    /// Reads an id that must lie in `0..bound`.
    fn next_index(&mut self, field: &str, bound: usize) -> Result<usize> {
        let value = self.next_count(field)?;
        if value >= bound {
            return Err(self.malformed_previous(format!(
                "{field} {value} is out of range (only {bound} declared)"
            )));
        }
        Ok(value)
    }
}
