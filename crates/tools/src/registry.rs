//! Skill discovery and caching.
//!
//! The registry serves two pools: the compiled-in core pool, registered
//! first and immutable during a run, and the sandbox pool of generated-skill
//! manifests discovered from the directory named by the hot-reload
//! environment pointer. On a repeated name the earlier pool wins; within the
//! sandbox pool the earlier file wins. Manifests are parsed fully only on
//! first `get`, so a broken sandbox file degrades to a warning instead of
//! poisoning the registry.

use crate::manifest::{ManifestSkill, SkillManifest};
use crate::skills::core_skills;
use crate::Skill;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Environment pointer to the sandbox skill directory. This is the single
/// configuration value legitimately re-read at call time: evolution updates
/// it when deploying a generated skill.
pub const SANDBOX_MCP_SKILLS_DIR_ENV: &str = "SANDBOX_MCP_SKILLS_DIR";

struct SandboxEntry {
    name: String,
    path: PathBuf,
    skill: Option<Arc<dyn Skill>>,
}

#[derive(Default)]
struct SandboxPool {
    dir: Option<PathBuf>,
    entries: Vec<SandboxEntry>,
}

/// Two-pool skill registry with hot reload.
pub struct SkillRegistry {
    core: Vec<Arc<dyn Skill>>,
    pool: Mutex<SandboxPool>,
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SkillRegistry {
    /// Registry with the built-in core pool.
    pub fn new() -> Self {
        Self::with_core(core_skills())
    }

    /// Registry with an explicit core pool (tests).
    pub fn with_core(core: Vec<Arc<dyn Skill>>) -> Self {
        Self {
            core,
            pool: Mutex::new(SandboxPool::default()),
        }
    }

    /// Observe the sandbox-pointer environment variable and rediscover the
    /// sandbox pool when it changed. Returns true when a reload happened.
    pub fn reload_if_changed(&self) -> bool {
        let current = std::env::var(SANDBOX_MCP_SKILLS_DIR_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let mut pool = self.pool.lock();
        if pool.dir == current {
            return false;
        }

        pool.entries = match &current {
            Some(dir) => discover(dir),
            None => Vec::new(),
        };
        debug!(dir = ?current, skills = pool.entries.len(), "sandbox skill pool reloaded");
        pool.dir = current;
        true
    }

    /// Skill names in pool order, first occurrence winning.
    pub fn names(&self) -> Vec<String> {
        self.reload_if_changed();
        let mut names: Vec<String> = self.core.iter().map(|s| s.name().to_string()).collect();
        for entry in self.pool.lock().entries.iter() {
            if !names.contains(&entry.name) {
                names.push(entry.name.clone());
            }
        }
        names
    }

    /// Resolve a skill by name; core pool first, then the sandbox pool with
    /// lazy manifest parsing.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        if let Some(skill) = self.core.iter().find(|s| s.name() == name) {
            return Some(Arc::clone(skill));
        }

        let mut pool = self.pool.lock();
        let entry = pool.entries.iter_mut().find(|e| e.name == name)?;
        if let Some(skill) = &entry.skill {
            return Some(Arc::clone(skill));
        }
        match load_manifest(&entry.path) {
            Ok(skill) => {
                entry.skill = Some(Arc::clone(&skill));
                Some(skill)
            }
            Err(e) => {
                warn!(path = %entry.path.display(), error = %e, "broken sandbox skill");
                None
            }
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.names().iter().any(|n| n == name)
    }
}

/// Enumerate manifest files in a directory, in filename order.
///
/// Only the skill name is read here; full parsing is deferred to first use.
fn discover(dir: &Path) -> Vec<SandboxEntry> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && matches_pattern(p))
            .collect(),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot read sandbox skill directory");
            return Vec::new();
        }
    };
    files.sort();

    let mut entries: Vec<SandboxEntry> = Vec::new();
    for path in files {
        match peek_name(&path) {
            Some(name) => {
                if entries.iter().any(|e| e.name == name) {
                    debug!(%name, path = %path.display(), "duplicate sandbox skill, first wins");
                    continue;
                }
                entries.push(SandboxEntry {
                    name,
                    path,
                    skill: None,
                });
            }
            None => warn!(path = %path.display(), "manifest without a readable name, skipped"),
        }
    }
    entries
}

/// Discovery patterns: `*_skill.json` and `generated_skill_*.json`.
fn matches_pattern(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with("_skill.json")
        || (name.starts_with("generated_skill_") && name.ends_with(".json"))
}

fn peek_name(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&text).ok()?;
    value
        .get("name")
        .and_then(|n| n.as_str())
        .filter(|n| !n.trim().is_empty())
        .map(String::from)
}

fn load_manifest(path: &Path) -> common::Result<Arc<dyn Skill>> {
    let text = std::fs::read_to_string(path)?;
    let manifest = SkillManifest::from_json(&text)?;
    Ok(Arc::new(ManifestSkill::new(manifest)))
}
