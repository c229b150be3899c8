//! Benchmark input: the frozen writer↔relay bipartite graph.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{Pubkey, RelayUrl};

/// Bipartite adjacency between writers and their declared write relays.
/// One relation, two directions; [`RelayGraph::add_edge`] is the only
/// mutation path, so the directions always agree. `BTreeMap` keys give
/// deterministic iteration order, which the tie-break rules rely on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayGraph {
    writer_to_relays: BTreeMap<Pubkey, BTreeSet<RelayUrl>>,
    relay_to_writers: BTreeMap<RelayUrl, BTreeSet<Pubkey>>,
}

impl RelayGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a writer with an empty relay list. Such writers are
    /// structural orphans: present in the graph, coverable by nobody.
    pub fn add_writer(&mut self, writer: &str) {
        self.writer_to_relays.entry(writer.to_string()).or_default();
    }

    /// Declare that `writer` publishes to `relay`.
    pub fn add_edge(&mut self, writer: &str, relay: &str) {
        self.writer_to_relays
            .entry(writer.to_string())
            .or_default()
            .insert(relay.to_string());
        self.relay_to_writers
            .entry(relay.to_string())
            .or_default()
            .insert(writer.to_string());
    }

    /// Build from per-writer declared relay lists.
    pub fn from_declarations<'a, I>(declarations: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [&'a str])>,
    {
        let mut graph = Self::new();
        for (writer, relays) in declarations {
            graph.add_writer(writer);
            for relay in relays {
                graph.add_edge(writer, relay);
            }
        }
        graph
    }

    pub fn writer_count(&self) -> usize {
        self.writer_to_relays.len()
    }

    pub fn relay_count(&self) -> usize {
        self.relay_to_writers.len()
    }

    /// Declared relays of one writer. `None` for unknown writers.
    pub fn relays_of(&self, writer: &str) -> Option<&BTreeSet<RelayUrl>> {
        self.writer_to_relays.get(writer)
    }

    /// Writers declaring a relay. `None` for unknown relays.
    pub fn writers_on(&self, relay: &str) -> Option<&BTreeSet<Pubkey>> {
        self.relay_to_writers.get(relay)
    }

    pub fn writers(&self) -> impl Iterator<Item = &Pubkey> {
        self.writer_to_relays.keys()
    }

    pub fn relays(&self) -> impl Iterator<Item = &RelayUrl> {
        self.relay_to_writers.keys()
    }

    pub fn writer_map(&self) -> &BTreeMap<Pubkey, BTreeSet<RelayUrl>> {
        &self.writer_to_relays
    }

    pub fn relay_map(&self) -> &BTreeMap<RelayUrl, BTreeSet<Pubkey>> {
        &self.relay_to_writers
    }

    pub fn has_writer(&self, writer: &str) -> bool {
        self.writer_to_relays.contains_key(writer)
    }

    /// Check that both directions describe the same edge set.
    pub fn duality_holds(&self) -> bool {
        let forward: usize = self.writer_to_relays.values().map(BTreeSet::len).sum();
        let backward: usize = self.relay_to_writers.values().map(BTreeSet::len).sum();
        if forward != backward {
            return false;
        }
        self.writer_to_relays.iter().all(|(w, relays)| {
            relays.iter().all(|r| {
                self.relay_to_writers
                    .get(r)
                    .is_some_and(|ws| ws.contains(w))
            })
        })
    }
}

/// Frozen snapshot handed to every algorithm. Strategies take
/// `&BenchmarkInput` and can never mutate it.
#[derive(Debug, Clone)]
pub struct BenchmarkInput {
    /// The reader whose follow list is being optimized.
    pub target_pubkey: Pubkey,
    /// Followed authors, in follow-list order.
    pub follows: Vec<Pubkey>,
    /// Writer↔relay adjacency for follows that declared relay lists.
    pub graph: RelayGraph,
    /// Follows with no usable relay list. Never coverable.
    pub follows_missing_relay_list: BTreeSet<Pubkey>,
    /// Unix timestamp of the snapshot fetch.
    pub fetched_at: u64,
}

impl BenchmarkInput {
    /// Follows that declared at least one relay.
    pub fn coverable_follows(&self) -> impl Iterator<Item = &Pubkey> {
        self.follows.iter().filter(|f| {
            self.graph
                .relays_of(f)
                .is_some_and(|relays| !relays.is_empty())
        })
    }

    pub fn coverable_count(&self) -> usize {
        self.coverable_follows().count()
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::input_from;
    use super::*;

    #[test]
    fn edges_appear_in_both_directions() {
        let mut graph = RelayGraph::new();
        graph.add_edge("pk1", "wss://a.example/");
        graph.add_edge("pk1", "wss://b.example/");
        graph.add_edge("pk2", "wss://a.example/");

        assert!(graph.duality_holds());
        assert_eq!(graph.writer_count(), 2);
        assert_eq!(graph.relay_count(), 2);
        assert_eq!(
            graph.writers_on("wss://a.example/").map(BTreeSet::len),
            Some(2)
        );
        assert_eq!(graph.relays_of("pk1").map(BTreeSet::len), Some(2));
    }

    #[test]
    fn writer_without_relays_is_tracked() {
        let mut graph = RelayGraph::new();
        graph.add_writer("pk1");
        assert!(graph.has_writer("pk1"));
        assert_eq!(graph.relays_of("pk1").map(BTreeSet::len), Some(0));
        assert_eq!(graph.relay_count(), 0);
        assert!(graph.duality_holds());
    }

    #[test]
    fn iteration_order_is_sorted() {
        let mut graph = RelayGraph::new();
        graph.add_edge("pk2", "wss://z.example/");
        graph.add_edge("pk1", "wss://a.example/");
        let relays: Vec<&RelayUrl> = graph.relays().collect();
        assert_eq!(relays, ["wss://a.example/", "wss://z.example/"]);
        let writers: Vec<&Pubkey> = graph.writers().collect();
        assert_eq!(writers, ["pk1", "pk2"]);
    }

    #[test]
    fn coverable_follows_excludes_missing() {
        let input = input_from(&[
            ("pk_a", &["wss://r1.example/", "wss://r2.example/"]),
            ("pk_b", &["wss://r2.example/"]),
            ("pk_c", &[]),
        ]);
        assert_eq!(input.coverable_count(), 2);
        assert!(input.follows_missing_relay_list.contains("pk_c"));
    }
}
