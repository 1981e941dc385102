// crates/weft-server/src/gateway/selector.rs
// Backend selection: weighted random by default, consistent hash when the
// request carries a tenant or correlation identity

use rand::Rng;

use weft_types::CompiledBackend;

/// FNV-1a, 32-bit.
fn fnv1a(key: &str) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c9dc5;
    const PRIME: u32 = 16_777_619;
    let mut hash = OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Pick a backend from an already-filtered (ready) slice.
///
/// Sticky routing applies iff `tenant_id` or `correlation_id` is non-empty:
/// the same identity maps to the same backend while the backend set is
/// stable. Otherwise selection is weighted random; zero total weight falls
/// back to a uniform pick.
pub fn select_backend<'a>(
    backends: &'a [CompiledBackend],
    tenant_id: &str,
    correlation_id: &str,
) -> Option<&'a CompiledBackend> {
    match backends {
        [] => None,
        [only] => Some(only),
        _ if !tenant_id.is_empty() || !correlation_id.is_empty() => {
            let key = format!("{tenant_id}:{correlation_id}");
            let index = fnv1a(&key) as usize % backends.len();
            Some(&backends[index])
        }
        _ => Some(weighted_random(backends)),
    }
}

fn weighted_random(backends: &[CompiledBackend]) -> &CompiledBackend {
    let total: u32 = backends.iter().map(|b| b.weight).sum();
    let mut rng = rand::rng();
    if total == 0 {
        return &backends[rng.random_range(0..backends.len())];
    }
    let threshold = rng.random_range(0..total);
    let mut accumulated = 0;
    for backend in backends {
        accumulated += backend.weight;
        if threshold < accumulated {
            return backend;
        }
    }
    // Unreachable while weights sum to total; keep the last as a safe answer.
    &backends[backends.len() - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(name: &str, weight: u32) -> CompiledBackend {
        CompiledBackend {
            agent_name: name.to_string(),
            namespace: "prod".to_string(),
            endpoint: format!("{name}.prod.svc.cluster.local:8080"),
            weight,
            ready: true,
        }
    }

    #[test]
    fn test_empty_returns_none() {
        assert!(select_backend(&[], "", "").is_none());
    }

    #[test]
    fn test_single_backend_fast_path() {
        let backends = [backend("only", 0)];
        let picked = select_backend(&backends, "tenant", "corr").unwrap();
        assert_eq!(picked.agent_name, "only");
    }

    #[test]
    fn test_consistent_hash_is_sticky() {
        let backends = [backend("a", 50), backend("b", 50), backend("c", 50)];
        let first = select_backend(&backends, "tenant-1", "corr-9").unwrap();
        for _ in 0..20 {
            let again = select_backend(&backends, "tenant-1", "corr-9").unwrap();
            assert_eq!(again.agent_name, first.agent_name);
        }
    }

    #[test]
    fn test_consistent_hash_uses_tenant_and_correlation() {
        let backends: Vec<CompiledBackend> =
            (0..8).map(|i| backend(&format!("b{i}"), 1)).collect();
        // Different identities should not all land on one backend
        let mut seen = std::collections::HashSet::new();
        for i in 0..64 {
            let picked = select_backend(&backends, &format!("tenant-{i}"), "").unwrap();
            seen.insert(picked.agent_name.clone());
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn test_weighted_split_distribution() {
        let backends = [backend("heavy", 80), backend("light", 20)];
        let mut heavy = 0;
        let trials = 10_000;
        for _ in 0..trials {
            if select_backend(&backends, "", "").unwrap().agent_name == "heavy" {
                heavy += 1;
            }
        }
        // 8000 expected; allow a generous band
        assert!((7_500..=8_500).contains(&heavy), "heavy hit {heavy} times");
    }

    #[test]
    fn test_zero_weights_pick_uniformly() {
        let backends = [backend("a", 0), backend("b", 0)];
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(select_backend(&backends, "", "").unwrap().agent_name.clone());
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_fnv1a_known_vectors() {
        // Reference values for the 32-bit FNV-1a function
        assert_eq!(fnv1a(""), 0x811c9dc5);
        assert_eq!(fnv1a("a"), 0xe40c292c);
        assert_eq!(fnv1a("foobar"), 0xbf9cf968);
    }
}
