//! Environment-variable configuration loading (§6).

use std::path::PathBuf;

const DEFAULT_PAGE_SIZE: u32 = 100;
const MANAGER_FILE_CANDIDATES: &[&str] = &[
    "managers.json",
    "manager_map.json",
    "managers_map.json",
    "child_to_manager.json",
];

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub user_filter: Option<String>,
    pub page_size: u32,
    pub managers_file: Option<PathBuf>,
}

impl DirectoryConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            tenant_id: require_env("AZ_TENANT_ID")?,
            client_id: require_env("AZ_CLIENT_ID")?,
            client_secret: require_env("AZ_CLIENT_SECRET")?,
            user_filter: std::env::var("USER_FILTER").ok(),
            page_size: std::env::var("PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PAGE_SIZE),
            managers_file: resolve_managers_file(),
        })
    }

    pub fn token_url(&self) -> String {
        format!("https://login.microsoftonline.com/{}/oauth2/v2.0/token", self.tenant_id)
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub lotus_password: Option<String>,
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self {
            lotus_password: std::env::var("LOTUS_PASSWORD").ok(),
        }
    }
}

/// CAS root directory: `NOTES_CAS_ROOT`, else `$LOCALAPPDATA/notes_cas`,
/// else `$HOME/notes_cas`.
pub fn cas_root() -> PathBuf {
    if let Ok(explicit) = std::env::var("NOTES_CAS_ROOT") {
        return PathBuf::from(explicit);
    }
    if let Ok(local_app_data) = std::env::var("LOCALAPPDATA") {
        return PathBuf::from(local_app_data).join("notes_cas");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join("notes_cas")
}

/// `MANAGERS_FILE`, else the first of the well-known candidate filenames
/// that exists in the working directory.
fn resolve_managers_file() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("MANAGERS_FILE") {
        return Some(PathBuf::from(explicit));
    }
    MANAGER_FILE_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn require_env(name: &str) -> anyhow::Result<String> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("missing required environment variable {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_url_embeds_tenant() {
        let cfg = DirectoryConfig {
            tenant_id: "tenant-1".into(),
            client_id: "id".into(),
            client_secret: "secret".into(),
            user_filter: None,
            page_size: 100,
            managers_file: None,
        };
        assert_eq!(
            cfg.token_url(),
            "https://login.microsoftonline.com/tenant-1/oauth2/v2.0/token"
        );
    }
}
