//! Builds a manager/report tree from a flat user list and a resolved
//! child→manager map, and renders it as the flat, tree, and id-pair JSON
//! shapes consumers have historically expected.

use ingest_model::User;
use serde::Serialize;
use std::collections::HashMap;

/// Assign `manager_id` on each user from the resolved map, then populate
/// each user's direct `reports` (ids only, flat).
pub fn assign_managers(users: &mut [User], manager_map: &HashMap<String, Option<String>>) {
    let mut reports: HashMap<String, Vec<String>> = HashMap::new();

    for user in users.iter_mut() {
        user.manager_id = manager_map.get(&user.id).cloned().flatten();
    }

    for user in users.iter() {
        if let Some(manager_id) = &user.manager_id {
            reports.entry(manager_id.clone()).or_default().push(user.id.clone());
        }
    }

    for user in users.iter_mut() {
        user.reports = reports.remove(&user.id).unwrap_or_default();
    }
}

/// A node in the nested org tree, used only for the tree JSON rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrgNode {
    pub id: String,
    pub display_name: String,
    pub user_principal_name: String,
    pub reports: Vec<OrgNode>,
}

/// Build the nested tree of org nodes rooted at users with no resolved
/// manager (or whose manager isn't present in this user set), each
/// subtree sorted by display name.
pub fn build_tree(users: &[User]) -> Vec<OrgNode> {
    let by_id: HashMap<&str, &User> = users.iter().map(|u| (u.id.as_str(), u)).collect();

    fn to_node(user: &User, by_id: &HashMap<&str, &User>) -> OrgNode {
        let mut reports: Vec<OrgNode> = user
            .reports
            .iter()
            .filter_map(|id| by_id.get(id.as_str()))
            .map(|child| to_node(child, by_id))
            .collect();
        reports.sort_by_key(|n| n.display_name.to_lowercase());
        OrgNode {
            id: user.id.clone(),
            display_name: user.display_name.clone(),
            user_principal_name: user.user_principal_name.clone(),
            reports,
        }
    }

    let mut roots: Vec<OrgNode> = users
        .iter()
        .filter(|u| match &u.manager_id {
            Some(manager_id) => !by_id.contains_key(manager_id.as_str()),
            None => true,
        })
        .map(|u| to_node(u, &by_id))
        .collect();

    roots.sort_by_key(|n| n.display_name.to_lowercase());
    roots
}

/// Minimal flat node shape for `org_for_viewer.json` (§6): enough fields
/// to render a directory listing plus `reports` as bare ids, never
/// nested objects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewerNode {
    pub id: String,
    pub display_name: String,
    pub user_principal_name: String,
    pub mail_nickname: String,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub manager_id: Option<String>,
    pub reports: Vec<String>,
}

/// Flat `{id, displayName, userPrincipalName, mailNickname, jobTitle,
/// department, managerId, reports:[ids]}` view used by `org_for_viewer.json`.
pub fn to_viewer_nodes(users: &[User]) -> Vec<ViewerNode> {
    users
        .iter()
        .map(|u| ViewerNode {
            id: u.id.clone(),
            display_name: u.display_name.clone(),
            user_principal_name: u.user_principal_name.clone(),
            mail_nickname: u.mail_nickname.clone(),
            job_title: u.job_title.clone(),
            department: u.department.clone(),
            manager_id: u.manager_id.clone(),
            reports: u.reports.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.to_string(),
            display_name: name.to_string(),
            user_principal_name: format!("{id}@example.com"),
            mail_nickname: id.to_string(),
            mail: None,
            job_title: None,
            department: None,
            manager_id: None,
            reports: Vec::new(),
        }
    }

    #[test]
    fn assign_managers_populates_reports() {
        let mut users = vec![user("bob", "Bob"), user("alice", "Alice"), user("carol", "Carol")];
        let mut map = HashMap::new();
        map.insert("alice".to_string(), Some("bob".to_string()));
        map.insert("carol".to_string(), Some("bob".to_string()));
        map.insert("bob".to_string(), None);

        assign_managers(&mut users, &map);

        let bob = users.iter().find(|u| u.id == "bob").unwrap();
        let mut reports = bob.reports.clone();
        reports.sort();
        assert_eq!(reports, vec!["alice".to_string(), "carol".to_string()]);
    }

    #[test]
    fn build_tree_roots_users_without_resolvable_manager() {
        let mut users = vec![user("bob", "Bob"), user("alice", "Alice")];
        let mut map = HashMap::new();
        map.insert("alice".to_string(), Some("bob".to_string()));
        map.insert("bob".to_string(), Some("ghost-manager".to_string()));
        assign_managers(&mut users, &map);

        let tree = build_tree(&users);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id, "bob");
        assert_eq!(tree[0].reports.len(), 1);
        assert_eq!(tree[0].reports[0].id, "alice");
    }

    #[test]
    fn build_tree_sorts_siblings_by_display_name() {
        let mut users = vec![user("z", "Zack"), user("a", "Amy"), user("m", "Mona")];
        let map = HashMap::new();
        assign_managers(&mut users, &map);
        let tree = build_tree(&users);
        let names: Vec<_> = tree.iter().map(|n| n.display_name.clone()).collect();
        assert_eq!(names, vec!["Amy", "Mona", "Zack"]);
    }

    #[test]
    fn to_viewer_nodes_carries_null_manager_and_report_ids() {
        let mut users = vec![user("root", "Root"), user("child", "Child")];
        let mut map = HashMap::new();
        map.insert("child".to_string(), Some("root".to_string()));
        assign_managers(&mut users, &map);
        let nodes = to_viewer_nodes(&users);
        let root = nodes.iter().find(|n| n.id == "root").unwrap();
        assert_eq!(root.manager_id, None);
        assert_eq!(root.reports, vec!["child".to_string()]);
    }
}
