//! Generated-skill manifests.
//!
//! Evolution does not load generated code; a synthesized skill is a JSON
//! manifest describing its interface and a sequence of primitive storage
//! operations, interpreted by [`ManifestSkill`]. Placeholders of the form
//! `{param}` in operation fields and templates are substituted from the call
//! arguments.

use crate::{Skill, SkillResponse, StorageJail};
use common::{async_trait, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Declarative definition of a generated skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillManifest {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub steps: Vec<ManifestStep>,
    /// Message rendered on success, with `{param}` placeholders.
    pub message_template: String,
    /// Delta rendered on success, with `{param}` placeholders; must stay in
    /// the escaped namespace.
    pub delta_template: String,
}

impl SkillManifest {
    pub fn from_json(text: &str) -> Result<Self> {
        let manifest: SkillManifest = serde_json::from_str(text)?;
        if manifest.name.trim().is_empty() {
            return Err(Error::Validation("manifest has an empty name".to_string()));
        }
        Ok(manifest)
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_json(&text)
    }
}

/// One primitive storage operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ManifestStep {
    CreateFile {
        folder: String,
        name: String,
        #[serde(default)]
        content: String,
    },
    RemoveFile {
        folder: String,
        name: String,
    },
    CopyFile {
        from_folder: String,
        name: String,
        to_folder: String,
        #[serde(default)]
        new_name: Option<String>,
    },
    MoveFile {
        from_folder: String,
        name: String,
        to_folder: String,
    },
    CreateFolder {
        name: String,
    },
}

/// Interpreter executing a manifest as a [`Skill`].
pub struct ManifestSkill {
    manifest: SkillManifest,
}

impl ManifestSkill {
    pub fn new(manifest: SkillManifest) -> Self {
        Self { manifest }
    }

    async fn run_step(&self, step: &ManifestStep, jail: &StorageJail, args: &Map<String, Value>) -> Result<()> {
        match step {
            ManifestStep::CreateFile {
                folder,
                name,
                content,
            } => {
                let path = jail.file_path(&substitute(folder, args), &substitute(name, args))?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, substitute(content, args)).await?;
            }
            ManifestStep::RemoveFile { folder, name } => {
                let path = jail.file_path(&substitute(folder, args), &substitute(name, args))?;
                tokio::fs::remove_file(&path).await?;
            }
            ManifestStep::CopyFile {
                from_folder,
                name,
                to_folder,
                new_name,
            } => {
                let name = substitute(name, args);
                let source = jail.file_path(&substitute(from_folder, args), &name)?;
                let target_name = new_name
                    .as_ref()
                    .map(|n| substitute(n, args))
                    .unwrap_or(name);
                let target = jail.file_path(&substitute(to_folder, args), &target_name)?;
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(&source, &target).await?;
            }
            ManifestStep::MoveFile {
                from_folder,
                name,
                to_folder,
            } => {
                let name = substitute(name, args);
                let source = jail.file_path(&substitute(from_folder, args), &name)?;
                let target = jail.file_path(&substitute(to_folder, args), &name)?;
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::rename(&source, &target).await?;
            }
            ManifestStep::CreateFolder { name } => {
                let path = jail.folder_path(&substitute(name, args))?;
                tokio::fs::create_dir_all(&path).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Skill for ManifestSkill {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    fn input_schema(&self) -> Value {
        self.manifest.input_schema.clone()
    }

    async fn execute(&self, jail: &StorageJail, args: &Map<String, Value>) -> SkillResponse {
        for step in &self.manifest.steps {
            if let Err(e) = self.run_step(step, jail, args).await {
                return SkillResponse::error(format!("{} failed: {}", self.manifest.name, e));
            }
        }
        SkillResponse::success(
            substitute(&self.manifest.message_template, args),
            substitute(&self.manifest.delta_template, args),
        )
    }
}

/// Replace `{param}` placeholders with string arguments.
fn substitute(template: &str, args: &Map<String, Value>) -> String {
    let mut out = template.to_string();
    for (key, value) in args {
        if let Some(text) = value.as_str() {
            out = out.replace(&format!("{{{}}}", key), text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const COMPRESS_MANIFEST: &str = r#"{
        "name": "compress",
        "description": "pack a file into an archive",
        "input_schema": {
            "type": "object",
            "properties": {
                "file_name": {"type": "string"},
                "folder": {"type": "string"},
                "archive_name": {"type": "string"}
            },
            "required": ["file_name", "folder", "archive_name"]
        },
        "steps": [
            {"op": "copy_file", "from_folder": "{folder}", "name": "{file_name}", "to_folder": "{folder}", "new_name": "{archive_name}"}
        ],
        "message_template": "compressed {file_name} into {archive_name}",
        "delta_template": "(at {archive_name} {folder}) (is_created {archive_name}) (is_compressed {file_name} {archive_name})"
    }"#;

    fn args(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn test_manifest_parse_rejects_empty_name() {
        let bad = r#"{"name": " ", "description": "", "input_schema": {}, "steps": [], "message_template": "", "delta_template": ""}"#;
        assert!(SkillManifest::from_json(bad).is_err());
    }

    #[tokio::test]
    async fn test_manifest_skill_executes_steps_and_templates() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("log.txt"), b"data")
            .await
            .unwrap();
        let jail = StorageJail::new(dir.path());

        let manifest = SkillManifest::from_json(COMPRESS_MANIFEST).unwrap();
        let skill = ManifestSkill::new(manifest);
        assert_eq!(skill.name(), "compress");

        let response = skill
            .execute(
                &jail,
                &args(&[
                    ("file_name", "log_dot_txt"),
                    ("folder", "root"),
                    ("archive_name", "log_dot_zip"),
                ]),
            )
            .await;

        assert!(response.is_success());
        assert_eq!(
            response.metadata.pddl_delta.unwrap(),
            "(at log_dot_zip root) (is_created log_dot_zip) (is_compressed log_dot_txt log_dot_zip)"
        );
        assert!(dir.path().join("log.zip").is_file());
    }

    #[tokio::test]
    async fn test_manifest_skill_fails_on_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let jail = StorageJail::new(dir.path());
        let skill = ManifestSkill::new(SkillManifest::from_json(COMPRESS_MANIFEST).unwrap());

        let response = skill
            .execute(
                &jail,
                &args(&[
                    ("file_name", "ghost"),
                    ("folder", "root"),
                    ("archive_name", "a_dot_zip"),
                ]),
            )
            .await;
        assert!(!response.is_success());
    }
}
