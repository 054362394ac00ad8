//! File-system skills.

use super::{str_arg, string_schema};
use crate::{Skill, SkillResponse, StorageJail};
use common::{async_trait, escape};
use serde_json::{Map, Value};
use tracing::debug;

/// Scan a folder, learning its contents.
pub struct ScanSkill;

#[async_trait]
impl Skill for ScanSkill {
    fn name(&self) -> &str {
        "scan"
    }

    fn description(&self) -> &str {
        "Scan a folder and report the files it contains"
    }

    fn input_schema(&self) -> Value {
        string_schema(&[("folder", "folder to scan")])
    }

    async fn execute(&self, jail: &StorageJail, args: &Map<String, Value>) -> SkillResponse {
        let Some(folder) = str_arg(args, "folder") else {
            return SkillResponse::error("scan requires a folder argument");
        };
        let path = match jail.folder_path(folder) {
            Ok(p) => p,
            Err(e) => return SkillResponse::error(e.to_string()),
        };
        if !path.is_dir() {
            return SkillResponse::error(format!("folder not found: {}", folder));
        }

        let mut facts = vec![format!("(scanned {})", folder)];
        let mut seen = Vec::new();
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) => return SkillResponse::error(format!("cannot read {}: {}", folder, e)),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                let name = escape::escape(&entry.file_name().to_string_lossy());
                facts.push(format!("(at {} {})", name, folder));
                seen.push(name);
            }
        }
        seen.sort();
        facts.sort();

        debug!(folder, files = seen.len(), "scan completed");
        SkillResponse::success(
            format!("scanned {}: {} file(s) [{}]", folder, seen.len(), seen.join(", ")),
            facts.join(" "),
        )
    }
}

/// Move a file between folders.
pub struct MoveSkill;

#[async_trait]
impl Skill for MoveSkill {
    fn name(&self) -> &str {
        "move"
    }

    fn description(&self) -> &str {
        "Move a file from one folder to another"
    }

    fn input_schema(&self) -> Value {
        string_schema(&[
            ("file_name", "file to move (escaped form)"),
            ("from_folder", "source folder"),
            ("to_folder", "destination folder"),
        ])
    }

    async fn execute(&self, jail: &StorageJail, args: &Map<String, Value>) -> SkillResponse {
        let (Some(file), Some(from), Some(to)) = (
            str_arg(args, "file_name"),
            str_arg(args, "from_folder"),
            str_arg(args, "to_folder"),
        ) else {
            return SkillResponse::error("move requires file_name, from_folder, to_folder");
        };

        let source = match jail.file_path(from, file) {
            Ok(p) => p,
            Err(e) => return SkillResponse::error(e.to_string()),
        };
        let target_dir = match jail.folder_path(to) {
            Ok(p) => p,
            Err(e) => return SkillResponse::error(e.to_string()),
        };
        if !source.is_file() {
            return SkillResponse::error(format!("file not found: {} in {}", file, from));
        }
        if !target_dir.is_dir() {
            return SkillResponse::error(format!("target folder not found: {}", to));
        }

        let Some(physical_name) = source.file_name() else {
            return SkillResponse::error(format!("invalid file name: {}", file));
        };
        let target = target_dir.join(physical_name);
        if let Err(e) = tokio::fs::rename(&source, &target).await {
            return SkillResponse::error(format!("move failed: {}", e));
        }

        SkillResponse::success(
            format!("moved {} from {} to {}", file, from, to),
            format!("(and (not (at {file} {from})) (at {file} {to}))"),
        )
    }
}

/// Copy a file between folders; the source stays untouched.
pub struct CopySkill;

#[async_trait]
impl Skill for CopySkill {
    fn name(&self) -> &str {
        "copy"
    }

    fn description(&self) -> &str {
        "Copy a file into another folder, keeping the source"
    }

    fn input_schema(&self) -> Value {
        string_schema(&[
            ("file_name", "file to copy (escaped form)"),
            ("from_folder", "source folder"),
            ("to_folder", "destination folder"),
        ])
    }

    async fn execute(&self, jail: &StorageJail, args: &Map<String, Value>) -> SkillResponse {
        let (Some(file), Some(from), Some(to)) = (
            str_arg(args, "file_name"),
            str_arg(args, "from_folder"),
            str_arg(args, "to_folder"),
        ) else {
            return SkillResponse::error("copy requires file_name, from_folder, to_folder");
        };

        let source = match jail.file_path(from, file) {
            Ok(p) => p,
            Err(e) => return SkillResponse::error(e.to_string()),
        };
        let target = match jail.file_path(to, file) {
            Ok(p) => p,
            Err(e) => return SkillResponse::error(e.to_string()),
        };
        if !source.is_file() {
            return SkillResponse::error(format!("file not found: {} in {}", file, from));
        }
        if target.parent().map(|p| !p.is_dir()).unwrap_or(true) {
            return SkillResponse::error(format!("target folder not found: {}", to));
        }
        if let Err(e) = tokio::fs::copy(&source, &target).await {
            return SkillResponse::error(format!("copy failed: {}", e));
        }

        // Copy never deletes source facts.
        SkillResponse::success(
            format!("copied {} from {} to {}", file, from, to),
            format!("(at {file} {to}) (is_copied {file} {file}) (is_created {file})"),
        )
    }
}

/// Remove a file.
pub struct RemoveFileSkill;

#[async_trait]
impl Skill for RemoveFileSkill {
    fn name(&self) -> &str {
        "remove_file"
    }

    fn description(&self) -> &str {
        "Delete a file from a folder"
    }

    fn input_schema(&self) -> Value {
        string_schema(&[
            ("file_name", "file to delete (escaped form)"),
            ("folder_name", "containing folder"),
        ])
    }

    async fn execute(&self, jail: &StorageJail, args: &Map<String, Value>) -> SkillResponse {
        let (Some(file), Some(folder)) =
            (str_arg(args, "file_name"), str_arg(args, "folder_name"))
        else {
            return SkillResponse::error("remove_file requires file_name, folder_name");
        };

        let path = match jail.file_path(folder, file) {
            Ok(p) => p,
            Err(e) => return SkillResponse::error(e.to_string()),
        };
        if !path.is_file() {
            return SkillResponse::error(format!("file not found: {} in {}", file, folder));
        }
        if let Err(e) = tokio::fs::remove_file(&path).await {
            return SkillResponse::error(format!("remove failed: {}", e));
        }

        SkillResponse::success(
            format!("removed {} from {}", file, folder),
            format!("(not (at {file} {folder}))"),
        )
    }
}

/// Rename a file in place.
pub struct RenameSkill;

#[async_trait]
impl Skill for RenameSkill {
    fn name(&self) -> &str {
        "rename"
    }

    fn description(&self) -> &str {
        "Rename a file within its folder"
    }

    fn input_schema(&self) -> Value {
        string_schema(&[
            ("old_name", "current file name (escaped form)"),
            ("new_name", "new file name (escaped form)"),
            ("folder", "containing folder"),
        ])
    }

    async fn execute(&self, jail: &StorageJail, args: &Map<String, Value>) -> SkillResponse {
        let (Some(old), Some(new), Some(folder)) = (
            str_arg(args, "old_name"),
            str_arg(args, "new_name"),
            str_arg(args, "folder"),
        ) else {
            return SkillResponse::error("rename requires old_name, new_name, folder");
        };

        let source = match jail.file_path(folder, old) {
            Ok(p) => p,
            Err(e) => return SkillResponse::error(e.to_string()),
        };
        let target = match jail.file_path(folder, new) {
            Ok(p) => p,
            Err(e) => return SkillResponse::error(e.to_string()),
        };
        if !source.is_file() {
            return SkillResponse::error(format!("file not found: {} in {}", old, folder));
        }
        if let Err(e) = tokio::fs::rename(&source, &target).await {
            return SkillResponse::error(format!("rename failed: {}", e));
        }

        SkillResponse::success(
            format!("renamed {} to {} in {}", old, new, folder),
            format!("(and (not (at {old} {folder})) (at {new} {folder}) (is_created {new}))"),
        )
    }
}

/// Create an empty file.
pub struct CreateFileSkill;

#[async_trait]
impl Skill for CreateFileSkill {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create an empty file in a folder"
    }

    fn input_schema(&self) -> Value {
        string_schema(&[
            ("file_name", "file to create (escaped form)"),
            ("folder", "target folder"),
        ])
    }

    async fn execute(&self, jail: &StorageJail, args: &Map<String, Value>) -> SkillResponse {
        let (Some(file), Some(folder)) = (str_arg(args, "file_name"), str_arg(args, "folder"))
        else {
            return SkillResponse::error("create_file requires file_name, folder");
        };

        let path = match jail.file_path(folder, file) {
            Ok(p) => p,
            Err(e) => return SkillResponse::error(e.to_string()),
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return SkillResponse::error(format!("cannot create folder {}: {}", folder, e));
            }
        }
        if let Err(e) = tokio::fs::write(&path, b"").await {
            return SkillResponse::error(format!("create failed: {}", e));
        }

        SkillResponse::success(
            format!("created {} in {}", file, folder),
            format!("(at {file} {folder}) (is_created {file})"),
        )
    }
}

/// Create a folder.
pub struct CreateFolderSkill;

#[async_trait]
impl Skill for CreateFolderSkill {
    fn name(&self) -> &str {
        "create_folder"
    }

    fn description(&self) -> &str {
        "Create a folder under a parent folder"
    }

    fn input_schema(&self) -> Value {
        string_schema(&[
            ("folder_name", "folder to create"),
            ("parent_folder", "parent folder"),
        ])
    }

    async fn execute(&self, jail: &StorageJail, args: &Map<String, Value>) -> SkillResponse {
        let Some(folder) = str_arg(args, "folder_name") else {
            return SkillResponse::error("create_folder requires folder_name");
        };
        // Folders live one level under the jail root regardless of parent;
        // the parent argument keeps the logical hierarchy in the delta.
        let parent = str_arg(args, "parent_folder").unwrap_or("root");

        let path = match jail.folder_path(folder) {
            Ok(p) => p,
            Err(e) => return SkillResponse::error(e.to_string()),
        };
        if let Err(e) = tokio::fs::create_dir_all(&path).await {
            return SkillResponse::error(format!("create_folder failed: {}", e));
        }

        SkillResponse::success(
            format!("created folder {} under {}", folder, parent),
            format!("(is_created {folder}) (is_empty {folder}) (connected {parent} {folder})"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    async fn jail_with_file(file: &str) -> (tempfile::TempDir, StorageJail) {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(file), b"data").await.unwrap();
        tokio::fs::create_dir(dir.path().join("backup")).await.unwrap();
        let jail = StorageJail::new(dir.path());
        (dir, jail)
    }

    #[tokio::test]
    async fn test_scan_reports_escaped_files() {
        let (_dir, jail) = jail_with_file("report.txt").await;
        let response = ScanSkill.execute(&jail, &args(&[("folder", "root")])).await;

        assert!(response.is_success());
        let delta = response.metadata.pddl_delta.unwrap();
        assert!(delta.contains("(scanned root)"));
        assert!(delta.contains("(at report_dot_txt root)"));
        assert!(!delta.contains('.'));
    }

    #[tokio::test]
    async fn test_move_produces_paired_delta() {
        let (dir, jail) = jail_with_file("a.txt").await;
        let response = MoveSkill
            .execute(
                &jail,
                &args(&[
                    ("file_name", "a_dot_txt"),
                    ("from_folder", "root"),
                    ("to_folder", "backup"),
                ]),
            )
            .await;

        assert!(response.is_success());
        assert_eq!(
            response.metadata.pddl_delta.unwrap(),
            "(and (not (at a_dot_txt root)) (at a_dot_txt backup))"
        );
        assert!(dir.path().join("backup/a.txt").is_file());
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_move_missing_file_fails() {
        let (_dir, jail) = jail_with_file("a.txt").await;
        let response = MoveSkill
            .execute(
                &jail,
                &args(&[
                    ("file_name", "ghost"),
                    ("from_folder", "root"),
                    ("to_folder", "backup"),
                ]),
            )
            .await;
        assert!(!response.is_success());
        assert!(response.metadata.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_copy_keeps_source() {
        let (dir, jail) = jail_with_file("a.txt").await;
        let response = CopySkill
            .execute(
                &jail,
                &args(&[
                    ("file_name", "a_dot_txt"),
                    ("from_folder", "root"),
                    ("to_folder", "backup"),
                ]),
            )
            .await;

        assert!(response.is_success());
        let delta = response.metadata.pddl_delta.unwrap();
        assert!(!delta.contains("not"));
        assert!(dir.path().join("a.txt").is_file());
        assert!(dir.path().join("backup/a.txt").is_file());
    }

    #[tokio::test]
    async fn test_remove_file() {
        let (dir, jail) = jail_with_file("a.txt").await;
        let response = RemoveFileSkill
            .execute(
                &jail,
                &args(&[("file_name", "a_dot_txt"), ("folder_name", "root")]),
            )
            .await;

        assert!(response.is_success());
        assert_eq!(
            response.metadata.pddl_delta.unwrap(),
            "(not (at a_dot_txt root))"
        );
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_create_file_and_folder() {
        let dir = tempfile::tempdir().unwrap();
        let jail = StorageJail::new(dir.path());

        let response = CreateFolderSkill
            .execute(
                &jail,
                &args(&[("folder_name", "docs"), ("parent_folder", "root")]),
            )
            .await;
        assert!(response.is_success());
        assert!(dir.path().join("docs").is_dir());

        let response = CreateFileSkill
            .execute(
                &jail,
                &args(&[("file_name", "note_dot_md"), ("folder", "docs")]),
            )
            .await;
        assert!(response.is_success());
        assert!(dir.path().join("docs/note.md").is_file());
    }

    #[tokio::test]
    async fn test_rename_delta() {
        let (_dir, jail) = jail_with_file("a.txt").await;
        let response = RenameSkill
            .execute(
                &jail,
                &args(&[
                    ("old_name", "a_dot_txt"),
                    ("new_name", "b_dot_txt"),
                    ("folder", "root"),
                ]),
            )
            .await;
        assert!(response.is_success());
        let delta = response.metadata.pddl_delta.unwrap();
        assert!(delta.contains("(not (at a_dot_txt root))"));
        assert!(delta.contains("(at b_dot_txt root)"));
    }
}
