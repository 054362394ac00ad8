//! Archive skills.
//!
//! Packaging is a collaborator concern; these skills track archive membership
//! at the fact level while keeping the physical artifact a plain byte copy.

use super::{str_arg, string_schema};
use crate::{Skill, SkillResponse, StorageJail};
use common::async_trait;
use serde_json::{Map, Value};

/// Pack a file into an archive in the same folder.
pub struct CompressSkill;

#[async_trait]
impl Skill for CompressSkill {
    fn name(&self) -> &str {
        "compress"
    }

    fn description(&self) -> &str {
        "Pack a file into an archive in the same folder"
    }

    fn input_schema(&self) -> Value {
        string_schema(&[
            ("file_name", "file to compress (escaped form)"),
            ("folder", "containing folder"),
            ("archive_name", "archive to create (escaped form)"),
        ])
    }

    async fn execute(&self, jail: &StorageJail, args: &Map<String, Value>) -> SkillResponse {
        let (Some(file), Some(folder), Some(archive)) = (
            str_arg(args, "file_name"),
            str_arg(args, "folder"),
            str_arg(args, "archive_name"),
        ) else {
            return SkillResponse::error("compress requires file_name, folder, archive_name");
        };

        let source = match jail.file_path(folder, file) {
            Ok(p) => p,
            Err(e) => return SkillResponse::error(e.to_string()),
        };
        let target = match jail.file_path(folder, archive) {
            Ok(p) => p,
            Err(e) => return SkillResponse::error(e.to_string()),
        };
        if !source.is_file() {
            return SkillResponse::error(format!("file not found: {} in {}", file, folder));
        }
        if let Err(e) = tokio::fs::copy(&source, &target).await {
            return SkillResponse::error(format!("compress failed: {}", e));
        }

        // The source stays in place; compression only adds facts.
        SkillResponse::success(
            format!("compressed {} into {} in {}", file, archive, folder),
            format!(
                "(at {archive} {folder}) (is_created {archive}) (is_compressed {file} {archive})"
            ),
        )
    }
}

/// Unpack a file out of an archive.
pub struct UncompressSkill;

#[async_trait]
impl Skill for UncompressSkill {
    fn name(&self) -> &str {
        "uncompress"
    }

    fn description(&self) -> &str {
        "Unpack a file from an archive into the same folder"
    }

    fn input_schema(&self) -> Value {
        string_schema(&[
            ("archive_name", "archive to unpack (escaped form)"),
            ("folder", "containing folder"),
            ("file_name", "file to restore (escaped form)"),
        ])
    }

    async fn execute(&self, jail: &StorageJail, args: &Map<String, Value>) -> SkillResponse {
        let (Some(archive), Some(folder), Some(file)) = (
            str_arg(args, "archive_name"),
            str_arg(args, "folder"),
            str_arg(args, "file_name"),
        ) else {
            return SkillResponse::error("uncompress requires archive_name, folder, file_name");
        };

        let source = match jail.file_path(folder, archive) {
            Ok(p) => p,
            Err(e) => return SkillResponse::error(e.to_string()),
        };
        let target = match jail.file_path(folder, file) {
            Ok(p) => p,
            Err(e) => return SkillResponse::error(e.to_string()),
        };
        if !source.is_file() {
            return SkillResponse::error(format!("archive not found: {} in {}", archive, folder));
        }
        if let Err(e) = tokio::fs::copy(&source, &target).await {
            return SkillResponse::error(format!("uncompress failed: {}", e));
        }

        SkillResponse::success(
            format!("uncompressed {} from {} in {}", file, archive, folder),
            format!(
                "(at {file} {folder}) (is_created {file}) (not (is_compressed {file} {archive}))"
            ),
        )
    }
}
