//! ---
//! cf_section: "05-routing"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Parsing of proxied access paths."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use cf_cluster::ClusterId;

/// Split `{prefix}/{clusterId}{rest}` into the cluster id and the remainder.
///
/// The remainder is empty or starts with `/`. Returns `None` when the path does
/// not sit under `prefix` or the segment is not a cluster id.
pub fn split<'a>(path: &'a str, prefix: &str) -> Option<(ClusterId, &'a str)> {
    let prefix = prefix.trim_end_matches('/');
    let after = path.strip_prefix(prefix)?.strip_prefix('/')?;
    let end = after.find('/').unwrap_or(after.len());
    let (segment, rest) = after.split_at(end);
    let id = ClusterId::parse_str(segment).ok()?;
    Some((id, rest))
}

/// Cluster id addressed by a proxied request path.
pub fn cluster_id(path: &str, prefix: &str) -> Option<ClusterId> {
    split(path, prefix).map(|(id, _)| id)
}

/// `{prefix}/{id}/**`, the pattern a route is installed under.
pub fn pattern(prefix: &str, id: ClusterId) -> String {
    format!("{}/{id}/**", prefix.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "3f2b8c1e-4d5a-4e6f-9a7b-0c1d2e3f4a5b";

    #[test]
    fn parses_id_and_remainder() {
        let path = format!("/access/{ID}/api/v1/items");
        let (id, rest) = split(&path, "/access").unwrap();
        assert_eq!(id.to_string(), ID);
        assert_eq!(rest, "/api/v1/items");
        assert_eq!(cluster_id(&format!("/access/{ID}"), "/access/"), Some(id));
    }

    #[test]
    fn rejects_foreign_paths() {
        assert_eq!(cluster_id(&format!("/other/{ID}/x"), "/access"), None);
        assert_eq!(cluster_id("/access/not-a-uuid/x", "/access"), None);
        assert_eq!(cluster_id(&format!("/accessx/{ID}"), "/access"), None);
        assert_eq!(cluster_id("/access", "/access"), None);
    }

    #[test]
    fn pattern_uses_prefix() {
        let id = ClusterId::parse_str(ID).unwrap();
        assert_eq!(pattern("/access/", id), format!("/access/{ID}/**"));
    }
}
