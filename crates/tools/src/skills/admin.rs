//! Permission and topology skills.

use super::{str_arg, string_schema};
use crate::{Skill, SkillResponse, StorageJail};
use common::async_trait;
use serde_json::{Map, Value};

/// Acquire admin rights for the session.
pub struct GetAdminSkill;

#[async_trait]
impl Skill for GetAdminSkill {
    fn name(&self) -> &str {
        "get_admin"
    }

    fn description(&self) -> &str {
        "Acquire administrator rights"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _jail: &StorageJail, _args: &Map<String, Value>) -> SkillResponse {
        SkillResponse::success("admin rights granted", "(has_admin_rights)")
    }
}

/// Declare two folders reachable from each other.
pub struct ConnectFoldersSkill;

#[async_trait]
impl Skill for ConnectFoldersSkill {
    fn name(&self) -> &str {
        "connect_folders"
    }

    fn description(&self) -> &str {
        "Connect two folders so files can move between them"
    }

    fn input_schema(&self) -> Value {
        string_schema(&[
            ("folder_a", "first folder"),
            ("folder_b", "second folder"),
        ])
    }

    async fn execute(&self, jail: &StorageJail, args: &Map<String, Value>) -> SkillResponse {
        let (Some(a), Some(b)) = (str_arg(args, "folder_a"), str_arg(args, "folder_b")) else {
            return SkillResponse::error("connect_folders requires folder_a, folder_b");
        };
        for folder in [a, b] {
            match jail.folder_path(folder) {
                Ok(path) if path.is_dir() => {}
                Ok(_) => return SkillResponse::error(format!("folder not found: {}", folder)),
                Err(e) => return SkillResponse::error(e.to_string()),
            }
        }

        SkillResponse::success(
            format!("connected {} and {}", a, b),
            format!("(connected {a} {b}) (connected {b} {a})"),
        )
    }
}
