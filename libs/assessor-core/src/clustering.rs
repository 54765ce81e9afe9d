// Plagiarism clustering over detector similarity pairs
use assessor_common::types::{Report, SimilarityPair};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use tracing::{debug, warn};

pub const DEFAULT_THRESHOLD: f64 = 1.0;

/// Weighted union-find with path halving.
#[derive(Debug, Clone)]
pub struct DisjointSet<T: Eq + Hash + Clone> {
    parent: HashMap<T, T>,
    size: HashMap<T, usize>,
}

impl<T: Eq + Hash + Clone> DisjointSet<T> {
    pub fn new() -> Self {
        Self {
            parent: HashMap::new(),
            size: HashMap::new(),
        }
    }

    /// Track `item` as a singleton if it is new.
    pub fn insert(&mut self, item: T) {
        if !self.parent.contains_key(&item) {
            self.parent.insert(item.clone(), item.clone());
            self.size.insert(item, 1);
        }
    }

    pub fn contains(&self, item: &T) -> bool {
        self.parent.contains_key(item)
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Root of `item`'s tree, halving the path on the way. `None` if untracked.
    pub fn root(&mut self, item: &T) -> Option<T> {
        let mut current = item.clone();
        loop {
            let parent = self.parent.get(&current)?.clone();
            if parent == current {
                return Some(current);
            }
            let grandparent = self.parent.get(&parent)?.clone();
            self.parent.insert(current, grandparent.clone());
            current = grandparent;
        }
    }

    pub fn union(&mut self, a: T, b: T) {
        self.insert(a.clone());
        self.insert(b.clone());
        let (Some(ra), Some(rb)) = (self.root(&a), self.root(&b)) else {
            return;
        };
        if ra == rb {
            return;
        }

        let size_a = self.size.get(&ra).copied().unwrap_or(1);
        let size_b = self.size.get(&rb).copied().unwrap_or(1);
        let (small, large) = if size_a < size_b { (ra, rb) } else { (rb, ra) };
        self.parent.insert(small, large.clone());
        self.size.insert(large, size_a + size_b);
    }

    pub fn connected(&mut self, a: &T, b: &T) -> bool {
        match (self.root(a), self.root(b)) {
            (Some(ra), Some(rb)) => ra == rb,
            _ => false,
        }
    }
}

impl<T: Eq + Hash + Clone + Ord> DisjointSet<T> {
    /// Every tracked item grouped by root, ordered by smallest member.
    pub fn components(&mut self) -> Vec<BTreeSet<T>> {
        let items: Vec<T> = self.parent.keys().cloned().collect();
        let mut groups: HashMap<T, BTreeSet<T>> = HashMap::new();
        for item in items {
            if let Some(root) = self.root(&item) {
                groups.entry(root).or_default().insert(item);
            }
        }
        let ordered: BTreeMap<T, BTreeSet<T>> = groups
            .into_values()
            .filter_map(|group| group.iter().next().cloned().map(|first| (first, group)))
            .collect();
        ordered.into_values().collect()
    }
}

/// Group submissions connected by pairs scoring at least `threshold`.
///
/// Submissions that appear in no qualifying pair belong to no cluster.
pub fn cluster<T>(pairs: &[SimilarityPair<T>], threshold: f64) -> Vec<BTreeSet<T>>
where
    T: Eq + Hash + Clone + Ord,
{
    let mut set = DisjointSet::new();
    for pair in pairs.iter().filter(|p| p.score >= threshold) {
        set.union(pair.first.clone(), pair.second.clone());
    }
    let clusters = set.components();
    debug!(pairs = pairs.len(), clusters = clusters.len(), threshold, "Clustered similarity pairs");
    clusters
}

/// Attach the clusters of `pairs` to `report`.
pub fn annotate(report: &mut Report, pairs: &[SimilarityPair], threshold: f64) {
    let clusters = cluster(pairs, threshold);
    for (index, members) in clusters.iter().enumerate() {
        let unknown: Vec<&String> = members.iter().filter(|m| report.entry(m).is_none()).collect();
        if !unknown.is_empty() {
            warn!(cluster = index, ?unknown, "Clustered submissions missing from report");
        }
    }
    report.set_clusters(clusters);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: &str, b: &str, score: f64) -> SimilarityPair {
        SimilarityPair::new(a.to_string(), b.to_string(), score)
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_union_find_basics() {
        let mut ds = DisjointSet::new();
        ds.union(1, 2);
        ds.union(3, 4);
        assert!(ds.connected(&1, &2));
        assert!(!ds.connected(&1, &3));
        ds.union(2, 4);
        assert!(ds.connected(&1, &3));
        assert_eq!(ds.len(), 4);
        assert!(ds.root(&9).is_none());
        assert_eq!(ds.components(), vec![[1, 2, 3, 4].into_iter().collect::<BTreeSet<_>>()]);
    }

    #[test]
    fn test_smaller_tree_goes_under_larger() {
        let mut ds = DisjointSet::new();
        ds.union("a", "b");
        ds.union("a", "c");
        let big_root = ds.root(&"a").unwrap();
        ds.union("d", "a");
        assert_eq!(ds.root(&"d"), Some(big_root));
    }

    #[test]
    fn test_cluster_threshold() {
        let pairs = vec![
            pair("alice", "bob", 1.0),
            pair("bob", "carol", 1.0),
            pair("dave", "erin", 0.99),
            pair("frank", "gina", 1.0),
        ];
        let clusters = cluster(&pairs, DEFAULT_THRESHOLD);
        assert_eq!(clusters, vec![set(&["alice", "bob", "carol"]), set(&["frank", "gina"])]);
    }

    #[test]
    fn test_cluster_ignores_pair_order() {
        let mut pairs = vec![
            pair("a", "b", 1.0),
            pair("c", "d", 1.0),
            pair("b", "c", 1.0),
            pair("x", "y", 1.0),
        ];
        let forward = cluster(&pairs, 1.0);
        pairs.reverse();
        let backward = cluster(&pairs, 1.0);
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 2);
    }

    #[test]
    fn test_annotate_report() {
        let mut report = Report::new("Assignment");
        annotate(&mut report, &[pair("alice", "bob", 1.0), pair("carol", "dave", 0.5)], 1.0);
        assert!(report.has_clusters());
        assert_eq!(report.cluster_of("bob"), Some(&set(&["alice", "bob"])));
        assert!(report.cluster_of("carol").is_none());
    }

    #[test]
    fn test_cluster_empty() {
        assert!(cluster::<String>(&[], 1.0).is_empty());
    }
}
