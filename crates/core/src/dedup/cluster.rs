//! Joining identifier groups into clusters of duplicate locations.

use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Disjoint-set forest with path compression and union by rank.
#[derive(Debug, Clone, Default)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Representative of the set containing `x`.
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Point every node on the path straight at the root.
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Merge the sets containing `a` and `b`. Returns false if they were
    /// already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] = self.rank[ra].saturating_add(1);
            }
        }
        true
    }
}

/// Connected components of locations linked by shared identifier groups.
///
/// Groups with a single member link nothing. Only components with two or more
/// locations are returned; members are sorted, and clusters are ordered by
/// their smallest member.
pub fn find_clusters(groups: &BTreeMap<String, BTreeSet<Uuid>>) -> Vec<Vec<Uuid>> {
    let linking: Vec<&BTreeSet<Uuid>> = groups.values().filter(|g| g.len() > 1).collect();

    let ids: Vec<Uuid> = linking
        .iter()
        .flat_map(|g| g.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let index: BTreeMap<Uuid, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut sets = DisjointSet::new(ids.len());
    for group in linking {
        let mut members = group.iter().map(|id| index[id]);
        if let Some(first) = members.next() {
            for other in members {
                sets.union(first, other);
            }
        }
    }

    let mut components: BTreeMap<usize, Vec<Uuid>> = BTreeMap::new();
    for (i, id) in ids.iter().enumerate() {
        components.entry(sets.find(i)).or_default().push(*id);
    }

    // `ids` is sorted, so every component is too.
    let mut clusters: Vec<Vec<Uuid>> = components
        .into_values()
        .filter(|members| members.len() > 1)
        .collect();
    clusters.sort_by_key(|members| members[0]);
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn groups(entries: &[(&str, &[u128])]) -> BTreeMap<String, BTreeSet<Uuid>> {
        entries
            .iter()
            .map(|(key, members)| (key.to_string(), members.iter().map(|n| id(*n)).collect()))
            .collect()
    }

    #[test]
    fn test_disjoint_set_union_find() {
        let mut sets = DisjointSet::new(5);
        assert!(sets.union(0, 1));
        assert!(sets.union(3, 4));
        assert!(!sets.union(1, 0));
        assert_eq!(sets.find(0), sets.find(1));
        assert_ne!(sets.find(0), sets.find(3));
        assert!(sets.union(1, 4));
        assert_eq!(sets.find(0), sets.find(3));
        assert_ne!(sets.find(2), sets.find(0));
    }

    #[test]
    fn test_disjoint_set_long_chain_compresses() {
        let mut sets = DisjointSet::new(1000);
        for i in 1..1000 {
            sets.union(i - 1, i);
        }
        let root = sets.find(999);
        for i in 0..1000 {
            assert_eq!(sets.find(i), root);
        }
    }

    #[test]
    fn test_transitive_clusters() {
        // A-B share X, B-C share Y, D-E share Z, F alone.
        let clusters = find_clusters(&groups(&[
            ("x:1", &[1, 2]),
            ("y:1", &[2, 3]),
            ("z:1", &[4, 5]),
            ("w:1", &[6]),
        ]));
        assert_eq!(clusters, vec![vec![id(1), id(2), id(3)], vec![id(4), id(5)]]);
    }

    #[test]
    fn test_clusters_are_disjoint_and_maximal() {
        let clusters = find_clusters(&groups(&[
            ("a:1", &[5, 9]),
            ("b:1", &[1, 9]),
            ("c:1", &[1, 7, 8]),
            ("d:1", &[2, 3]),
        ]));
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0], vec![id(1), id(5), id(7), id(8), id(9)]);
        assert_eq!(clusters[1], vec![id(2), id(3)]);
    }

    #[test]
    fn test_no_clusters_without_shared_ids() {
        assert!(find_clusters(&groups(&[("a:1", &[1]), ("b:1", &[2])])).is_empty());
    }
}
