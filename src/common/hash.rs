//! Hashing utilities for minireshard
//!
//! HRW (Highest Random Weight) ranking over BLAKE3, used to pick recipient
//! shards deterministically for a given operation.

/// Weight of a node for a key
fn hrw_weight(key: &str, node: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(key.as_bytes());
    hasher.update(b"/");
    hasher.update(node.as_bytes());
    let hash = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(prefix)
}

/// HRW (Highest Random Weight) hashing
///
/// Given a key and a set of nodes, returns nodes sorted by their weight
/// (deterministic based on key). Ties are broken by node name.
pub fn hrw_hash(key: &str, nodes: &[String]) -> Vec<String> {
    let mut weights: Vec<(u64, &String)> = nodes
        .iter()
        .map(|node| (hrw_weight(key, node), node))
        .collect();

    weights.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    weights.into_iter().map(|(_, node)| node.clone()).collect()
}

/// Select N nodes using HRW hashing
pub fn select_nodes(key: &str, nodes: &[String], n: usize) -> Vec<String> {
    hrw_hash(key, nodes).into_iter().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes() -> Vec<String> {
        (1..=5).map(|i| format!("shard-{i}")).collect()
    }

    #[test]
    fn test_hrw_is_deterministic() {
        assert_eq!(hrw_hash("op-1", &nodes()), hrw_hash("op-1", &nodes()));
    }

    #[test]
    fn test_hrw_is_permutation() {
        let mut ranked = hrw_hash("op-1", &nodes());
        ranked.sort();
        assert_eq!(ranked, nodes());
    }

    #[test]
    fn test_select_nodes_caps_at_available() {
        assert_eq!(select_nodes("op-1", &nodes(), 2).len(), 2);
        assert_eq!(select_nodes("op-1", &nodes(), 10).len(), 5);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let mut reversed = nodes();
        reversed.reverse();
        assert_eq!(select_nodes("op-9", &nodes(), 3), select_nodes("op-9", &reversed, 3));
    }
}
