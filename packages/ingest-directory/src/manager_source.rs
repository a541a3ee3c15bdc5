//! Parses a manager-relationship file into a flat child→manager map.
//!
//! Supports the four shapes observed in the wild:
//!   - `{ childId: managerId, ... }`
//!   - `{ managerId: [childId, ...], ... }`
//!   - `[ { "managerId": "...", "reports": [...] }, ... ]`
//!   - `[ { "id": "childId", "managerId": "..." }, ... ]`

use crate::error::{DirectoryError, Result};
use serde_json::Value;
use std::collections::HashMap;

pub fn parse_manager_source(data: &Value) -> Result<HashMap<String, Option<String>>> {
    let mut child_to_manager = HashMap::new();

    match data {
        Value::Object(map) => {
            let any_list_valued = map.values().any(|v| v.is_array());
            if any_list_valued {
                // { managerId: [childId, ...], ... }
                for (manager_id, reports) in map {
                    let Some(reports) = reports.as_array() else {
                        continue;
                    };
                    for child in reports {
                        if let Some(child_id) = child.as_str() {
                            child_to_manager.insert(child_id.to_string(), Some(manager_id.clone()));
                        }
                    }
                }
            } else {
                // { childId: managerId, ... }
                for (child_id, manager_id) in map {
                    let manager_id = manager_id.as_str().map(|s| s.to_string());
                    child_to_manager.insert(child_id.clone(), manager_id);
                }
            }
        }
        Value::Array(rows) => {
            for row in rows {
                let Some(row) = row.as_object() else {
                    continue;
                };
                if row.contains_key("managerId") && row.get("reports").is_some_and(|r| r.is_array()) {
                    let manager_id = row.get("managerId").and_then(|v| v.as_str()).map(String::from);
                    for child in row.get("reports").and_then(|v| v.as_array()).unwrap() {
                        if let Some(child_id) = child.as_str() {
                            child_to_manager.insert(child_id.to_string(), manager_id.clone());
                        }
                    }
                } else if row.contains_key("id") && row.contains_key("managerId") {
                    let id = row
                        .get("id")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| DirectoryError::ManagerSource("row missing string id".into()))?;
                    let manager_id = row.get("managerId").and_then(|v| v.as_str()).map(String::from);
                    child_to_manager.insert(id.to_string(), manager_id);
                }
            }
        }
        _ => {
            return Err(DirectoryError::ManagerSource(
                "expected a JSON object or array at top level".into(),
            ))
        }
    }

    Ok(child_to_manager)
}
