// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Wave-level operation batching.
//!
//! Batchable lookups discovered in an execution wave are grouped by service
//! and target, deduplicated, and capped at a configured group size; the
//! fabric then issues one multi-item call per group and publishes the
//! results through the deduplicator, so the individual operator fetches
//! that follow are free.

/// One batchable lookup a wave wants performed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchRequest {
    /// Service kind, e.g. `vault` or `file`.
    pub service: &'static str,
    /// Dispatch target within the service (a mount, a base directory);
    /// empty when the service has a single target.
    pub target: String,
    /// The request key inside the target.
    pub key: String,
}

/// A dispatchable group: same service, same target, bounded size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchGroup {
    pub service: &'static str,
    pub target: String,
    pub keys: Vec<String>,
}

/// Group, deduplicate, and chunk the wave's requests. Order within a group
/// follows first appearance, which keeps dispatches deterministic for a
/// deterministic wave.
pub fn plan(requests: Vec<BatchRequest>, max_group: usize) -> Vec<BatchGroup> {
    let max_group = max_group.max(1);
    let mut groups: Vec<BatchGroup> = Vec::new();
    let mut seen: std::collections::HashSet<BatchRequest> = std::collections::HashSet::new();

    for request in requests {
        if !seen.insert(request.clone()) {
            continue;
        }
        let slot = groups.iter_mut().find(|g| {
            g.service == request.service && g.target == request.target && g.keys.len() < max_group
        });
        match slot {
            Some(group) => group.keys.push(request.key),
            None => groups.push(BatchGroup {
                service: request.service,
                target: request.target,
                keys: vec![request.key],
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(service: &'static str, target: &str, key: &str) -> BatchRequest {
        BatchRequest {
            service,
            target: target.to_string(),
            key: key.to_string(),
        }
    }

    #[test]
    fn test_groups_by_service_and_target() {
        let groups = plan(
            vec![
                req("vault", "kv", "secret/a"),
                req("file", "", "ca.pem"),
                req("vault", "kv", "secret/b"),
            ],
            16,
        );
        assert_eq!(groups.len(), 2);
        let vault = groups.iter().find(|g| g.service == "vault").unwrap();
        assert_eq!(vault.keys, vec!["secret/a", "secret/b"]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let groups = plan(
            vec![
                req("vault", "", "secret/a"),
                req("vault", "", "secret/a"),
                req("vault", "", "secret/a"),
            ],
            16,
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].keys, vec!["secret/a"]);
    }

    #[test]
    fn test_group_size_cap_chunks() {
        let requests = (0..5).map(|i| req("vault", "", &format!("k{}", i))).collect();
        let groups = plan(requests, 2);
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| g.keys.len() <= 2));
    }

    #[test]
    fn test_empty_plan() {
        assert!(plan(vec![], 8).is_empty());
    }
}
