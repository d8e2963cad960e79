//! Directory membership graph.
//!
//! Built in two passes over the directory collection. Pass 1 indexes every
//! object by its identifiers and resolves containment (parent DN) and
//! explicit `member`/`memberOf` links. Pass 2 resolves primary-group
//! membership, which the directory never lists explicitly: the group's SID
//! is the member's domain SID joined with its `primaryGroupId` RID.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use wikigraph_core::directory::DirectoryObject;

use super::interner::Interner;

/// One directory object in the graph. Links are node positions.
#[derive(Debug, Clone)]
pub struct DirectoryNode {
    pub guid: Arc<str>,
    pub dn: Arc<str>,
    pub sid: Option<Arc<str>>,
    pub sam_account_name: Option<Arc<str>>,
    pub dns_host_name: Option<Arc<str>>,
    pub is_group: bool,
    parent: Option<usize>,
    children: Vec<usize>,
    members: Vec<usize>,
    member_of: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct DirectoryGraph {
    nodes: Vec<DirectoryNode>,
    by_guid: HashMap<Arc<str>, usize>,
    by_dn: HashMap<Arc<str>, usize>,
    by_sid: HashMap<Arc<str>, usize>,
    by_sam: HashMap<Arc<str>, usize>,
    by_fqdn: HashMap<Arc<str>, usize>,
    unresolved_links: usize,
}

impl DirectoryGraph {
    pub fn build(objects: &[DirectoryObject], interner: &mut Interner) -> Self {
        let mut graph = Self::default();

        // Pass 1: nodes and identifiers.
        for object in objects {
            let key = normalize(&object.object_guid);
            if graph.by_guid.contains_key(key.as_str()) {
                tracing::warn!(guid = %object.object_guid, "Duplicate directory object skipped");
                continue;
            }
            let position = graph.nodes.len();
            let node = DirectoryNode {
                guid: interner.intern(&object.object_guid),
                dn: interner.intern(&object.distinguished_name),
                sid: object.object_sid.as_deref().map(|s| interner.intern(s)),
                sam_account_name: object.sam_account_name.as_deref().map(|s| interner.intern(s)),
                dns_host_name: object.dns_host_name.as_deref().map(|s| interner.intern(s)),
                is_group: object.is_group(),
                parent: None,
                children: Vec::new(),
                members: Vec::new(),
                member_of: Vec::new(),
            };
            graph.by_guid.insert(interner.intern(&key), position);
            graph
                .by_dn
                .insert(interner.intern(&normalize(&object.distinguished_name)), position);
            if let Some(sid) = &object.object_sid {
                graph.by_sid.insert(interner.intern(&normalize(sid)), position);
            }
            if let Some(sam) = &object.sam_account_name {
                graph.by_sam.insert(interner.intern(&normalize(sam)), position);
            }
            if let Some(fqdn) = &object.dns_host_name {
                graph.by_fqdn.insert(interner.intern(&normalize(fqdn)), position);
            }
            graph.nodes.push(node);
        }

        // Pass 1b: containment and explicit memberships.
        let mut memberships: HashSet<(usize, usize)> = HashSet::new();
        for object in objects {
            let Some(&position) = graph.by_guid.get(normalize(&object.object_guid).as_str()) else {
                continue;
            };
            if let Some(parent) = object
                .parent_dn()
                .and_then(|dn| graph.by_dn.get(normalize(dn).as_str()).copied())
            {
                if graph.nodes[position].parent.is_none() {
                    graph.nodes[position].parent = Some(parent);
                    graph.nodes[parent].children.push(position);
                }
            }
            for dn in &object.member {
                match graph.by_dn.get(normalize(dn).as_str()).copied() {
                    Some(member) => {
                        memberships.insert((position, member));
                    }
                    None => graph.unresolved_links += 1,
                }
            }
            for dn in &object.member_of {
                match graph.by_dn.get(normalize(dn).as_str()).copied() {
                    Some(group) => {
                        memberships.insert((group, position));
                    }
                    None => graph.unresolved_links += 1,
                }
            }
        }

        // Pass 2: primary groups.
        for object in objects {
            let Some(&position) = graph.by_guid.get(normalize(&object.object_guid).as_str()) else {
                continue;
            };
            let Some(group_sid) = object.primary_group_sid() else {
                continue;
            };
            match graph.by_sid.get(normalize(&group_sid).as_str()).copied() {
                Some(group) if group != position => {
                    memberships.insert((group, position));
                }
                Some(_) => {}
                None => graph.unresolved_links += 1,
            }
        }

        let mut memberships: Vec<_> = memberships.into_iter().collect();
        memberships.sort_unstable();
        for (group, member) in memberships {
            graph.nodes[group].members.push(member);
            graph.nodes[member].member_of.push(group);
        }

        if graph.unresolved_links > 0 {
            tracing::debug!(
                unresolved = graph.unresolved_links,
                "Directory links point outside the collection"
            );
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Links that named an object missing from the collection.
    pub fn unresolved_links(&self) -> usize {
        self.unresolved_links
    }

    /// Find an object by GUID, DN, SID, SAM account name or DNS host name.
    pub fn lookup(&self, key: &str) -> Option<&DirectoryNode> {
        let key = normalize(key);
        let key = key.as_str();
        [&self.by_guid, &self.by_dn, &self.by_sid, &self.by_sam, &self.by_fqdn]
            .into_iter()
            .find_map(|map| map.get(key))
            .map(|&i| &self.nodes[i])
    }

    pub fn parent(&self, key: &str) -> Option<&DirectoryNode> {
        let node = self.position(key)?;
        self.nodes[node].parent.map(|i| &self.nodes[i])
    }

    pub fn children(&self, key: &str) -> Vec<&DirectoryNode> {
        self.resolve(key, |n| &n.children)
    }

    /// Direct members of a group, including primary-group members.
    pub fn members(&self, key: &str) -> Vec<&DirectoryNode> {
        self.resolve(key, |n| &n.members)
    }

    /// Groups an object belongs to directly.
    pub fn member_of(&self, key: &str) -> Vec<&DirectoryNode> {
        self.resolve(key, |n| &n.member_of)
    }

    /// Every group an object belongs to, following nested groups.
    pub fn groups_of(&self, key: &str) -> Vec<&DirectoryNode> {
        let Some(start) = self.position(key) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut stack = self.nodes[start].member_of.clone();
        let mut groups = Vec::new();
        while let Some(group) = stack.pop() {
            if group == start || !seen.insert(group) {
                continue;
            }
            groups.push(&self.nodes[group]);
            stack.extend(self.nodes[group].member_of.iter().copied());
        }
        groups
    }

    fn position(&self, key: &str) -> Option<usize> {
        let key = normalize(key);
        let key = key.as_str();
        [&self.by_guid, &self.by_dn, &self.by_sid, &self.by_sam, &self.by_fqdn]
            .into_iter()
            .find_map(|map| map.get(key).copied())
    }

    fn resolve<'a>(
        &'a self,
        key: &str,
        links: impl Fn(&'a DirectoryNode) -> &'a Vec<usize>,
    ) -> Vec<&'a DirectoryNode> {
        match self.position(key) {
            Some(i) => links(&self.nodes[i]).iter().map(|&j| &self.nodes[j]).collect(),
            None => Vec::new(),
        }
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(guid: &str, dn: &str) -> DirectoryObject {
        DirectoryObject {
            object_guid: guid.into(),
            distinguished_name: dn.into(),
            object_sid: None,
            sam_account_name: None,
            dns_host_name: None,
            object_class: vec!["top".into()],
            member: Vec::new(),
            member_of: Vec::new(),
            primary_group_id: None,
        }
    }

    fn sample() -> Vec<DirectoryObject> {
        let mut ou = object("g-ou", "OU=Staff,DC=corp,DC=local");
        ou.object_class.push("organizationalUnit".into());

        let mut users = object("g-users", "CN=Domain Users,OU=Staff,DC=corp,DC=local");
        users.object_class.push("group".into());
        users.object_sid = Some("S-1-5-21-1-2-3-513".into());

        let mut admins = object("g-admins", "CN=Admins,OU=Staff,DC=corp,DC=local");
        admins.object_class.push("group".into());
        admins.member = vec!["CN=Alice,OU=Staff,DC=corp,DC=local".into()];
        admins.member_of = vec!["CN=Domain Users,OU=Staff,DC=corp,DC=local".into()];

        let mut alice = object("g-alice", "CN=Alice,OU=Staff,DC=corp,DC=local");
        alice.object_sid = Some("S-1-5-21-1-2-3-1104".into());
        alice.sam_account_name = Some("alice".into());
        alice.primary_group_id = Some(513);

        let mut host = object("g-host", "CN=WEB01,OU=Staff,DC=corp,DC=local");
        host.dns_host_name = Some("web01.corp.local".into());
        host.member_of = vec!["CN=Missing,DC=corp,DC=local".into()];

        vec![ou, users, admins, alice, host]
    }

    #[test]
    fn explicit_and_primary_group_membership() {
        let mut interner = Interner::new();
        let graph = DirectoryGraph::build(&sample(), &mut interner);
        assert_eq!(graph.len(), 5);

        let groups: Vec<&str> = graph.member_of("ALICE").iter().map(|n| &*n.guid).collect();
        assert_eq!(groups.len(), 2);
        assert!(groups.contains(&"g-admins"));
        assert!(groups.contains(&"g-users"));

        let members: Vec<&str> = graph
            .members("S-1-5-21-1-2-3-513")
            .iter()
            .map(|n| &*n.guid)
            .collect();
        assert!(members.contains(&"g-alice"));
        assert!(members.contains(&"g-admins"));
        assert_eq!(graph.unresolved_links(), 1);
    }

    #[test]
    fn containment_and_lookup() {
        let mut interner = Interner::new();
        let graph = DirectoryGraph::build(&sample(), &mut interner);

        assert_eq!(graph.parent("g-alice").map(|n| &*n.guid), Some("g-ou"));
        assert_eq!(graph.children("OU=Staff,DC=corp,DC=local").len(), 4);
        assert_eq!(
            graph.lookup("WEB01.corp.local").map(|n| &*n.guid),
            Some("g-host")
        );
        assert!(graph.lookup("nobody").is_none());
    }

    #[test]
    fn nested_groups_are_followed_without_looping() {
        let mut objects = sample();
        // Make the nesting cyclic.
        objects[1].member_of = vec!["CN=Admins,OU=Staff,DC=corp,DC=local".into()];
        let mut interner = Interner::new();
        let graph = DirectoryGraph::build(&objects, &mut interner);

        let groups: Vec<&str> = graph.groups_of("g-alice").iter().map(|n| &*n.guid).collect();
        assert_eq!(groups.len(), 2);
    }
}
