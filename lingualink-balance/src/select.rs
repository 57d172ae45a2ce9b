//! Backend selection policies.
//!
//! All policies operate on the healthy subset in sorted-name order, so
//! selection is reproducible. A successful pick reserves one connection
//! slot on the chosen backend; the caller must release it exactly once.
//! A backend at its connection cap is treated as unavailable for that
//! instant and selection retries among the rest.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use lingualink_core::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::registry::{BackendRegistry, SelectionCandidate};

/// Virtual nodes per unit of weight on the consistent-hash ring.
const VIRTUAL_NODES_PER_WEIGHT: u32 = 10;

/// Fallback request key for consistent hashing.
const DEFAULT_REQUEST_KEY: &str = "default";

/// The selection policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    Random,
    ConsistentHash,
    ResponseTime,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::WeightedRoundRobin => "weighted_round_robin",
            Self::LeastConnections => "least_connections",
            Self::Random => "random",
            Self::ConsistentHash => "consistent_hash",
            Self::ResponseTime => "response_time",
        }
    }

    pub fn all() -> &'static [Strategy] {
        &[
            Self::RoundRobin,
            Self::WeightedRoundRobin,
            Self::LeastConnections,
            Self::Random,
            Self::ConsistentHash,
            Self::ResponseTime,
        ]
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "round_robin" => Ok(Self::RoundRobin),
            "weighted_round_robin" => Ok(Self::WeightedRoundRobin),
            "least_connections" => Ok(Self::LeastConnections),
            "random" => Ok(Self::Random),
            "consistent_hash" => Ok(Self::ConsistentHash),
            "response_time" => Ok(Self::ResponseTime),
            other => Err(Error::Config(format!("unknown selection strategy {other:?}"))),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks backends from the registry under the active strategy.
pub struct Selector {
    registry: Arc<BackendRegistry>,
    state: Mutex<SelectorState>,
}

struct SelectorState {
    strategy: Strategy,
    cursor: usize,
    ring: BTreeMap<u128, String>,
}

impl Selector {
    pub fn new(registry: Arc<BackendRegistry>, strategy: Strategy) -> Self {
        let ring = build_ring(&registry.ring_members());
        Self { registry, state: Mutex::new(SelectorState { strategy, cursor: 0, ring }) }
    }

    pub fn strategy(&self) -> Strategy {
        self.state.lock().expect("selector lock poisoned").strategy
    }

    /// Switch policy at runtime; the hash ring is rebuilt so a strategy
    /// flip to consistent hashing starts from current membership.
    pub fn set_strategy(&self, strategy: Strategy) {
        let mut state = self.state.lock().expect("selector lock poisoned");
        state.strategy = strategy;
        state.ring = build_ring(&self.registry.ring_members());
        tracing::info!(strategy = %strategy, "selection strategy changed");
    }

    /// Rebuild the hash ring after registry membership or weights change.
    pub fn rebuild_ring(&self) {
        let mut state = self.state.lock().expect("selector lock poisoned");
        state.ring = build_ring(&self.registry.ring_members());
    }

    /// Pick a backend and reserve one connection slot on it.
    ///
    /// Backends at capacity are skipped as if unavailable; when every
    /// healthy backend is saturated the pick fails with [`Error::NoBackend`].
    pub fn select(&self, request_key: Option<&str>) -> Result<String> {
        let mut candidates = self.registry.selection_view();

        loop {
            if candidates.is_empty() {
                return Err(Error::NoBackend);
            }
            let picked = {
                let mut state = self.state.lock().expect("selector lock poisoned");
                match state.strategy {
                    Strategy::RoundRobin => round_robin(&candidates, &mut state.cursor),
                    Strategy::WeightedRoundRobin => {
                        weighted_round_robin(&candidates, &mut state.cursor)
                    }
                    Strategy::LeastConnections => least_connections(&candidates),
                    Strategy::Random => random_pick(&candidates),
                    Strategy::ConsistentHash => consistent_hash(
                        &state.ring,
                        &candidates,
                        request_key.unwrap_or(DEFAULT_REQUEST_KEY),
                    ),
                    Strategy::ResponseTime => response_time(&candidates, &mut state.cursor),
                }
            };
            let Some(name) = picked else {
                return Err(Error::NoBackend);
            };
            if self.registry.try_acquire(&name) {
                return Ok(name);
            }
            // At capacity: drop it from this round and re-run the policy.
            candidates.retain(|c| c.name != name);
        }
    }

    /// Return the connection slot taken by a prior [`Selector::select`].
    pub fn release(&self, name: &str) {
        self.registry.release(name);
    }
}

fn round_robin(candidates: &[SelectionCandidate], cursor: &mut usize) -> Option<String> {
    let picked = candidates[*cursor % candidates.len()].name.clone();
    *cursor = (*cursor + 1) % candidates.len();
    Some(picked)
}

fn weighted_round_robin(candidates: &[SelectionCandidate], cursor: &mut usize) -> Option<String> {
    let expanded: Vec<&str> = candidates
        .iter()
        .flat_map(|c| std::iter::repeat_n(c.name.as_str(), c.weight as usize))
        .collect();
    if expanded.is_empty() {
        return Some(candidates[0].name.clone());
    }
    let picked = expanded[*cursor % expanded.len()].to_string();
    *cursor = (*cursor + 1) % expanded.len();
    Some(picked)
}

fn least_connections(candidates: &[SelectionCandidate]) -> Option<String> {
    candidates
        .iter()
        .min_by_key(|c| c.active_connections)
        .map(|c| c.name.clone())
}

fn random_pick(candidates: &[SelectionCandidate]) -> Option<String> {
    let index = rand::rng().random_range(0..candidates.len());
    Some(candidates[index].name.clone())
}

fn consistent_hash(
    ring: &BTreeMap<u128, String>,
    candidates: &[SelectionCandidate],
    request_key: &str,
) -> Option<String> {
    if ring.is_empty() {
        return None;
    }
    let point = hash_point(request_key.as_bytes());
    // Clockwise from the request point, wrapping around the ring, to the
    // first virtual node whose backend is currently selectable.
    ring.range(point..)
        .chain(ring.range(..point))
        .map(|(_, name)| name)
        .find(|name| candidates.iter().any(|c| &c.name == *name))
        .cloned()
}

fn response_time(candidates: &[SelectionCandidate], cursor: &mut usize) -> Option<String> {
    let measured: Vec<&SelectionCandidate> =
        candidates.iter().filter(|c| c.response_time_samples > 0).collect();
    if measured.is_empty() {
        // Nothing measured yet; fall back to round robin.
        return round_robin(candidates, cursor);
    }
    let mut best = measured[0];
    for candidate in &measured[1..] {
        if candidate.average_response_time < best.average_response_time {
            best = candidate;
        }
    }
    Some(best.name.clone())
}

/// Ring over all registered backends: `weight × 10` virtual nodes per
/// backend, keyed by the MD5 of `"{name}#{i}"` as a 128-bit integer.
fn build_ring(members: &[(String, u32)]) -> BTreeMap<u128, String> {
    let mut ring = BTreeMap::new();
    for (name, weight) in members {
        for i in 0..(weight * VIRTUAL_NODES_PER_WEIGHT) {
            let point = hash_point(format!("{name}#{i}").as_bytes());
            ring.insert(point, name.clone());
        }
    }
    ring
}

fn hash_point(bytes: &[u8]) -> u128 {
    u128::from_be_bytes(md5::compute(bytes).0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingualink_core::BackendConfig;

    fn config(name: &str) -> BackendConfig {
        BackendConfig::new(name, format!("http://{name}:8000"), "model", "key")
    }

    fn selector(configs: Vec<BackendConfig>, strategy: Strategy) -> (Arc<BackendRegistry>, Selector) {
        let registry = Arc::new(BackendRegistry::new(configs));
        let selector = Selector::new(Arc::clone(&registry), strategy);
        (registry, selector)
    }

    /// Select then immediately release, returning the pick.
    fn pick(selector: &Selector, key: Option<&str>) -> String {
        let name = selector.select(key).unwrap();
        selector.release(&name);
        name
    }

    #[test]
    fn strategy_names_round_trip() {
        for strategy in Strategy::all() {
            assert_eq!(Strategy::from_str(strategy.as_str()).unwrap(), *strategy);
        }
        assert!(Strategy::from_str("fastest").is_err());
    }

    #[test]
    fn round_robin_cycles_in_sorted_order() {
        let (_, selector) = selector(vec![config("b"), config("a")], Strategy::RoundRobin);
        let picks: Vec<String> = (0..5).map(|_| pick(&selector, None)).collect();
        assert_eq!(picks, vec!["a", "b", "a", "b", "a"]);
    }

    #[test]
    fn weighted_round_robin_repeats_by_weight() {
        let (_, selector) = selector(
            vec![config("a").with_weight(2), config("b").with_weight(1)],
            Strategy::WeightedRoundRobin,
        );
        let picks: Vec<String> = (0..6).map(|_| pick(&selector, None)).collect();
        assert_eq!(picks, vec!["a", "a", "b", "a", "a", "b"]);
    }

    #[test]
    fn least_connections_prefers_the_idle_backend() {
        let (registry, selector) =
            selector(vec![config("a"), config("b")], Strategy::LeastConnections);

        // Hold a's slot: next pick must be b.
        let first = selector.select(None).unwrap();
        assert_eq!(first, "a"); // tie favors lowest-indexed name
        let second = selector.select(None).unwrap();
        assert_eq!(second, "b");

        selector.release(&first);
        selector.release(&second);
        assert_eq!(registry.active_connections("a"), Some(0));
        assert_eq!(registry.active_connections("b"), Some(0));
    }

    #[test]
    fn random_only_picks_registered_backends() {
        let (_, selector) = selector(vec![config("a"), config("b")], Strategy::Random);
        for _ in 0..20 {
            let name = pick(&selector, None);
            assert!(name == "a" || name == "b");
        }
    }

    #[test]
    fn consistent_hash_is_deterministic_per_key() {
        let (_, selector) =
            selector(vec![config("a"), config("b"), config("c")], Strategy::ConsistentHash);
        let first = pick(&selector, Some("tenant-42"));
        for _ in 0..10 {
            assert_eq!(pick(&selector, Some("tenant-42")), first);
        }
        // The default key is the literal "default".
        assert_eq!(pick(&selector, None), pick(&selector, Some("default")));
    }

    #[test]
    fn consistent_hash_ignores_unrelated_membership_changes() {
        let (registry, selector) =
            selector(vec![config("a"), config("b"), config("c")], Strategy::ConsistentHash);
        let stable = pick(&selector, Some("sticky-key"));

        // Toggle the health of a backend the key does not map to.
        let other = ["a", "b", "c"]
            .iter()
            .find(|name| **name != stable)
            .unwrap()
            .to_string();
        registry.disable(&other);
        assert_eq!(pick(&selector, Some("sticky-key")), stable);
        registry.enable(&other);
        assert_eq!(pick(&selector, Some("sticky-key")), stable);
    }

    #[test]
    fn consistent_hash_falls_over_when_the_owner_is_unhealthy() {
        let (registry, selector) =
            selector(vec![config("a"), config("b")], Strategy::ConsistentHash);
        let owner = pick(&selector, Some("k"));
        registry.disable(&owner);
        let fallback = pick(&selector, Some("k"));
        assert_ne!(fallback, owner);
    }

    #[test]
    fn response_time_prefers_the_fastest_measured_backend() {
        let (registry, selector) =
            selector(vec![config("a"), config("b")], Strategy::ResponseTime);
        registry.record_result("a", true, 0.9, None);
        registry.record_result("b", true, 0.1, None);
        assert_eq!(pick(&selector, None), "b");
    }

    #[test]
    fn response_time_without_samples_falls_back_to_round_robin() {
        let (_, selector) = selector(vec![config("a"), config("b")], Strategy::ResponseTime);
        assert_eq!(pick(&selector, None), "a");
        assert_eq!(pick(&selector, None), "b");
    }

    #[test]
    fn response_time_ignores_unmeasured_backends() {
        let (registry, selector) =
            selector(vec![config("a"), config("b")], Strategy::ResponseTime);
        registry.record_result("b", true, 5.0, None);
        // Only b is measured, so b wins even though it is slow.
        assert_eq!(pick(&selector, None), "b");
    }

    #[test]
    fn empty_healthy_subset_yields_no_backend() {
        for strategy in Strategy::all() {
            let (registry, selector) = selector(vec![config("a")], *strategy);
            registry.disable("a");
            assert!(matches!(selector.select(None), Err(Error::NoBackend)));
        }
    }

    #[test]
    fn single_backend_is_picked_under_every_policy() {
        for strategy in Strategy::all() {
            let (_, selector) = selector(vec![config("solo")], *strategy);
            assert_eq!(pick(&selector, Some("any")), "solo");
        }
    }

    #[test]
    fn selection_reserves_a_connection_slot() {
        let (registry, selector) = selector(vec![config("a")], Strategy::RoundRobin);
        let name = selector.select(None).unwrap();
        assert_eq!(registry.active_connections(&name), Some(1));
        selector.release(&name);
        assert_eq!(registry.active_connections(&name), Some(0));
    }

    #[test]
    fn saturated_backends_are_skipped() {
        let (registry, selector) = selector(
            vec![config("a").with_max_connections(1), config("b")],
            Strategy::RoundRobin,
        );
        let first = selector.select(None).unwrap();
        assert_eq!(first, "a");
        // a is at capacity: the cursor would pick b anyway, and a pick
        // of a would be re-routed.
        let second = selector.select(None).unwrap();
        assert_eq!(second, "b");
        let third = selector.select(None).unwrap();
        assert_eq!(third, "b");
        assert_eq!(registry.active_connections("a"), Some(1));
        assert_eq!(registry.active_connections("b"), Some(2));
    }

    #[test]
    fn all_backends_at_capacity_is_no_backend() {
        let (_, selector) = selector(
            vec![config("a").with_max_connections(1), config("b").with_max_connections(1)],
            Strategy::LeastConnections,
        );
        selector.select(None).unwrap();
        selector.select(None).unwrap();
        assert!(matches!(selector.select(None), Err(Error::NoBackend)));
    }

    #[test]
    fn ring_rebuild_tracks_membership() {
        let (registry, selector) = selector(vec![config("a")], Strategy::ConsistentHash);
        registry.add(config("b"));
        selector.rebuild_ring();
        // Both backends must be reachable through some key.
        let mut seen = std::collections::BTreeSet::new();
        for i in 0..64 {
            seen.insert(pick(&selector, Some(&format!("key-{i}"))));
        }
        assert!(seen.contains("a") && seen.contains("b"));
    }

    #[test]
    fn strategy_can_change_at_runtime() {
        let (_, selector) = selector(vec![config("a"), config("b")], Strategy::RoundRobin);
        assert_eq!(selector.strategy(), Strategy::RoundRobin);
        selector.set_strategy(Strategy::LeastConnections);
        assert_eq!(selector.strategy(), Strategy::LeastConnections);
        pick(&selector, None);
    }
}
