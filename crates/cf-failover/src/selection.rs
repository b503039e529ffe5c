//! ---
//! cf_section: "07-resilience-fault-tolerance"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Priority based access and backup selection."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use cf_cluster::Cluster;
use cf_providers::InstanceHandle;

/// Best two members by priority, as `(access, backup)`.
///
/// Starts from the cluster's current selection so equal priorities do not swap
/// on every recomputation. Ties keep the earlier candidate.
pub fn top_two(cluster: &Cluster) -> (Option<InstanceHandle>, Option<InstanceHandle>) {
    let priority_of = |handle: &Option<InstanceHandle>| {
        handle
            .as_ref()
            .and_then(|h| cluster.membership(h))
            .map_or(i32::MAX, |m| m.priority)
    };

    let mut primary = cluster.access_instance().cloned();
    let mut backup = cluster.backup_instance().cloned();
    for candidate in cluster.memberships() {
        if candidate.priority < priority_of(&primary) {
            backup = primary.take();
            primary = Some(candidate.handle.clone());
        } else if primary.as_ref() != Some(&candidate.handle)
            && candidate.priority < priority_of(&backup)
        {
            backup = Some(candidate.handle.clone());
        }
    }
    (primary, backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_providers::Provider;

    fn handle(id: &str) -> InstanceHandle {
        InstanceHandle::new(id, "r", Provider::Aws)
    }

    fn cluster(members: &[(&str, i32)]) -> Cluster {
        let mut cluster = Cluster::new("c");
        for (id, priority) in members {
            cluster.add_membership(handle(id), *priority);
        }
        cluster
    }

    #[test]
    fn picks_two_lowest_priorities() {
        let c = cluster(&[("h1", 3), ("h2", 1), ("h3", 2)]);
        assert_eq!(top_two(&c), (Some(handle("h2")), Some(handle("h3"))));
    }

    #[test]
    fn single_member_has_no_backup() {
        let c = cluster(&[("h1", 5)]);
        assert_eq!(top_two(&c), (Some(handle("h1")), None));
        assert_eq!(top_two(&Cluster::new("empty")), (None, None));
    }

    #[test]
    fn ties_keep_first_seen() {
        let c = cluster(&[("h1", 1), ("h2", 1), ("h3", 1)]);
        assert_eq!(top_two(&c), (Some(handle("h1")), Some(handle("h2"))));
    }

    #[test]
    fn existing_selection_wins_ties() {
        let mut c = cluster(&[("h1", 1), ("h2", 1), ("h3", 1)]);
        c.set_selection(Some(handle("h3")), Some(handle("h2"))).unwrap();
        assert_eq!(top_two(&c), (Some(handle("h3")), Some(handle("h2"))));
    }

    #[test]
    fn demoted_access_hands_over_to_next_best() {
        let mut c = cluster(&[("aws", 1), ("gcp", 1), ("azure", 1)]);
        c.set_selection(Some(handle("aws")), None).unwrap();
        c.demote(&handle("aws"));
        assert_eq!(top_two(&c), (Some(handle("gcp")), Some(handle("azure"))));
    }
}
