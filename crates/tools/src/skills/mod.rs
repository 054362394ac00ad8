//! Built-in skills: the core pool.
//!
//! These compiled-in skills are registered ahead of the sandbox manifest pool
//! and are immutable during a run. Every skill reports its effects as a delta
//! over the escaped namespace; physical paths are only produced through the
//! storage jail.

mod admin;
mod archive;
mod fs;

pub use admin::{ConnectFoldersSkill, GetAdminSkill};
pub use archive::{CompressSkill, UncompressSkill};
pub use fs::{
    CopySkill, CreateFileSkill, CreateFolderSkill, MoveSkill, RemoveFileSkill, RenameSkill,
    ScanSkill,
};

use crate::Skill;
use std::sync::Arc;

/// The core pool in registration order.
pub fn core_skills() -> Vec<Arc<dyn Skill>> {
    vec![
        Arc::new(ScanSkill),
        Arc::new(MoveSkill),
        Arc::new(CopySkill),
        Arc::new(RemoveFileSkill),
        Arc::new(RenameSkill),
        Arc::new(CreateFileSkill),
        Arc::new(CreateFolderSkill),
        Arc::new(CompressSkill),
        Arc::new(UncompressSkill),
        Arc::new(GetAdminSkill),
        Arc::new(ConnectFoldersSkill),
    ]
}

/// Fetch a required string argument.
pub(crate) fn str_arg<'a>(
    args: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// Standard schema for a list of required string properties.
pub(crate) fn string_schema(required: &[(&str, &str)]) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    for (name, description) in required {
        properties.insert(
            name.to_string(),
            serde_json::json!({"type": "string", "description": description}),
        );
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
    })
}
