//! Adaptive directory client and manager-hierarchy builder.

pub mod client;
pub mod error;
pub mod hierarchy;
pub mod manager_source;

pub use client::AdaptiveDirectoryClient;
pub use error::{DirectoryError, Result};
pub use hierarchy::{assign_managers, build_tree, to_viewer_nodes, OrgNode, ViewerNode};
pub use manager_source::parse_manager_source;
