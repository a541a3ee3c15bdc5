//! Property-based tests for the §3/§8 hierarchy forest invariants: every
//! user appears exactly once across the built tree, and roots are
//! exactly the users whose resolved manager id is absent from the set.
//!
//! Manager assignments are generated so each user's manager (when
//! present) has a strictly earlier index than the user itself -- the
//! same acyclic-forest precondition §3 documents for `User.managerId`.
//! `build_tree` assumes that invariant rather than defends against its
//! violation, so the generator must respect it too.

use ingest_directory::{assign_managers, build_tree, OrgNode};
use ingest_model::User;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

fn bare_user(id: String) -> User {
    User {
        id: id.clone(),
        display_name: format!("User {id}"),
        user_principal_name: format!("{id}@example.com"),
        mail_nickname: id,
        mail: None,
        job_title: None,
        department: None,
        manager_id: None,
        reports: Vec::new(),
    }
}

fn count_nodes(nodes: &[OrgNode], seen: &mut HashSet<String>) {
    for node in nodes {
        seen.insert(node.id.clone());
        count_nodes(&node.reports, seen);
    }
}

/// `(ids, child_to_manager)` where every manager points to a strictly
/// earlier id in `ids`, so the generated relationships are always a
/// forest.
fn acyclic_manager_map() -> impl Strategy<Value = (Vec<String>, HashMap<String, Option<String>>)> {
    (2usize..9).prop_flat_map(|n| {
        let ids: Vec<String> = (0..n).map(|i| format!("u{i}")).collect();
        prop::collection::vec(0u8..200, n).prop_map(move |picks| {
            let mut map = HashMap::new();
            for i in 1..n {
                if picks[i] % 2 == 0 {
                    let manager_idx = picks[i] as usize % i;
                    map.insert(ids[i].clone(), Some(ids[manager_idx].clone()));
                } else {
                    map.insert(ids[i].clone(), None);
                }
            }
            (ids.clone(), map)
        })
    })
}

proptest! {
    #[test]
    fn every_user_appears_exactly_once_in_the_tree((ids, manager_map) in acyclic_manager_map()) {
        let mut users: Vec<User> = ids.iter().map(|id| bare_user(id.clone())).collect();

        assign_managers(&mut users, &manager_map);
        let tree = build_tree(&users);

        let mut seen = HashSet::new();
        count_nodes(&tree, &mut seen);
        let expected: HashSet<String> = ids.into_iter().collect();
        prop_assert_eq!(seen.len(), expected.len());
        prop_assert_eq!(seen, expected);
    }

    #[test]
    fn roots_are_exactly_users_with_unresolvable_manager((ids, manager_map) in acyclic_manager_map()) {
        let mut users: Vec<User> = ids.iter().map(|id| bare_user(id.clone())).collect();
        let id_set: HashSet<&str> = ids.iter().map(|s| s.as_str()).collect();

        assign_managers(&mut users, &manager_map);
        let tree = build_tree(&users);

        let expected_roots: HashSet<&str> = users
            .iter()
            .filter(|u| match &u.manager_id {
                Some(m) => !id_set.contains(m.as_str()),
                None => true,
            })
            .map(|u| u.id.as_str())
            .collect();

        let actual_roots: HashSet<&str> = tree.iter().map(|n| n.id.as_str()).collect();
        prop_assert_eq!(actual_roots, expected_roots);
    }
}
