//! CoT trace recording.
//!
//! The recorder accretes schema-conforming training records over a mission:
//! successful Brain/Nerves steps and Analysis-diagnosed errors, partitioned
//! per downstream training consumer on export. Data purity: there is no
//! success flag anywhere in a data point; a failed mission simply has
//! non-empty error arrays. The recorder exclusively owns its data; reads get
//! clones.

use common::{Error, MissionId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One successful high-level step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrainStep {
    #[serde(rename = "Env")]
    pub env: String,
    #[serde(rename = "ChainOfTask")]
    pub chain_of_task: Vec<String>,
    #[serde(rename = "ChangeReason", skip_serializing_if = "Option::is_none")]
    pub change_reason: Option<String>,
}

/// One successful atomic step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NervesStep {
    #[serde(rename = "Task")]
    pub task: String,
    #[serde(rename = "Env")]
    pub env: String,
    #[serde(rename = "ChainOfAction")]
    pub chain_of_action: Vec<String>,
}

/// A diagnosed high-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrainErrorRecord {
    #[serde(rename = "Env")]
    pub env: String,
    #[serde(rename = "ChainOfTask")]
    pub chain_of_task: Vec<String>,
    #[serde(rename = "ErrorMessage")]
    pub error_message: String,
}

/// A diagnosed atomic failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NervesErrorRecord {
    #[serde(rename = "Task")]
    pub task: String,
    #[serde(rename = "Env")]
    pub env: String,
    #[serde(rename = "ChainOfAction")]
    pub chain_of_action: Vec<String>,
    #[serde(rename = "ErrorMessage")]
    pub error_message: String,
}

/// The full record of one mission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CotDataPoint {
    pub mission_id: String,
    pub mission: String,
    pub domain: String,
    #[serde(rename = "Brain")]
    pub brain: Vec<BrainStep>,
    #[serde(rename = "Nerves")]
    pub nerves: Vec<NervesStep>,
    #[serde(rename = "BrainError")]
    pub brain_errors: Vec<BrainErrorRecord>,
    #[serde(rename = "NervesError")]
    pub nerves_errors: Vec<NervesErrorRecord>,
}

impl CotDataPoint {
    fn new(mission_id: MissionId, mission: &str, domain: &str) -> Self {
        Self {
            mission_id: mission_id.to_string(),
            mission: mission.to_string(),
            domain: domain.to_string(),
            brain: Vec::new(),
            nerves: Vec::new(),
            brain_errors: Vec::new(),
            nerves_errors: Vec::new(),
        }
    }

    /// Total recorded steps, successes and errors together.
    pub fn step_count(&self) -> usize {
        self.brain.len() + self.nerves.len() + self.brain_errors.len() + self.nerves_errors.len()
    }

    pub fn error_count(&self) -> usize {
        self.brain_errors.len() + self.nerves_errors.len()
    }
}

/// Paths of one per-consumer training export.
#[derive(Debug, Clone)]
pub struct TrainingExport {
    pub brain_path: PathBuf,
    pub nerves_path: PathBuf,
    pub analysis_path: PathBuf,
}

/// Append-only recorder for one mission at a time.
pub struct CotRecorder {
    output_dir: PathBuf,
    current: Option<CotDataPoint>,
}

impl CotRecorder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            current: None,
        }
    }

    /// Begin recording a mission; returns its unique id.
    pub fn start(&mut self, mission: &str, domain: &str) -> MissionId {
        let id = MissionId::new();
        self.current = Some(CotDataPoint::new(id, mission, domain));
        debug!(%id, mission, "mission recording started");
        id
    }

    pub fn record_brain_success(
        &mut self,
        env: impl Into<String>,
        chain_of_task: Vec<String>,
        change_reason: Option<String>,
    ) -> Result<()> {
        self.active()?.brain.push(BrainStep {
            env: env.into(),
            chain_of_task,
            change_reason,
        });
        Ok(())
    }

    pub fn record_nerves_success(
        &mut self,
        task: impl Into<String>,
        env: impl Into<String>,
        chain_of_action: Vec<String>,
    ) -> Result<()> {
        self.active()?.nerves.push(NervesStep {
            task: task.into(),
            env: env.into(),
            chain_of_action,
        });
        Ok(())
    }

    pub fn record_brain_error(
        &mut self,
        env: impl Into<String>,
        chain_of_task: Vec<String>,
        error_message: impl Into<String>,
    ) -> Result<()> {
        self.active()?.brain_errors.push(BrainErrorRecord {
            env: env.into(),
            chain_of_task,
            error_message: error_message.into(),
        });
        Ok(())
    }

    pub fn record_nerves_error(
        &mut self,
        task: impl Into<String>,
        env: impl Into<String>,
        chain_of_action: Vec<String>,
        error_message: impl Into<String>,
    ) -> Result<()> {
        self.active()?.nerves_errors.push(NervesErrorRecord {
            task: task.into(),
            env: env.into(),
            chain_of_action,
            error_message: error_message.into(),
        });
        Ok(())
    }

    /// Frozen view of the current data point.
    pub fn current(&self) -> Option<CotDataPoint> {
        self.current.clone()
    }

    /// Persist the current data point and clear the recorder.
    pub async fn save_and_reset(&mut self, filename: Option<String>) -> Result<PathBuf> {
        let point = self
            .current
            .take()
            .ok_or_else(|| Error::Validation("no mission data to save".to_string()))?;

        let filename = filename.unwrap_or_else(|| {
            let stamp = common::now().format("%Y%m%d_%H%M%S");
            format!("cot_{}_{}.json", &point.mission_id[..8], stamp)
        });
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(filename);
        tokio::fs::write(&path, serde_json::to_string_pretty(&point)?).await?;
        info!(path = %path.display(), steps = point.step_count(), "mission data saved");
        Ok(path)
    }

    /// Export the current mission as per-consumer training partitions:
    /// Brain successes, Nerves successes, and all errors.
    pub async fn export_training_data(&self, out_dir: Option<&Path>) -> Result<TrainingExport> {
        let point = self
            .current
            .as_ref()
            .ok_or_else(|| Error::Validation("no mission data to export".to_string()))?;
        let dir = out_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.output_dir.join("training_data"));
        tokio::fs::create_dir_all(&dir).await?;

        let id8 = &point.mission_id[..8];
        let brain_path = dir.join(format!("brain_{}.json", id8));
        let nerves_path = dir.join(format!("nerves_{}.json", id8));
        let analysis_path = dir.join(format!("analysis_{}.json", id8));

        tokio::fs::write(
            &brain_path,
            serde_json::to_string_pretty(&serde_json::json!({
                "mission": point.mission,
                "steps": point.brain,
            }))?,
        )
        .await?;
        tokio::fs::write(
            &nerves_path,
            serde_json::to_string_pretty(&serde_json::json!({
                "mission": point.mission,
                "steps": point.nerves,
            }))?,
        )
        .await?;
        tokio::fs::write(
            &analysis_path,
            serde_json::to_string_pretty(&serde_json::json!({
                "mission": point.mission,
                "brain_errors": point.brain_errors,
                "nerves_errors": point.nerves_errors,
            }))?,
        )
        .await?;

        Ok(TrainingExport {
            brain_path,
            nerves_path,
            analysis_path,
        })
    }

    fn active(&mut self) -> Result<&mut CotDataPoint> {
        self.current
            .as_mut()
            .ok_or_else(|| Error::Validation("start a mission before recording".to_string()))
    }
}

/// Aggregate counters over a batch of missions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub active_missions: usize,
    pub completed_missions: usize,
    pub total_steps: usize,
    pub total_errors: usize,
}

/// Manages many per-mission recorders concurrently.
pub struct BatchRecorder {
    output_dir: PathBuf,
    active: BTreeMap<String, CotRecorder>,
    completed: Vec<CotDataPoint>,
}

impl BatchRecorder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            active: BTreeMap::new(),
            completed: Vec::new(),
        }
    }

    /// Start a new mission recorder; returns its id.
    pub fn start_mission(&mut self, mission: &str, domain: &str) -> MissionId {
        let mut recorder = CotRecorder::new(&self.output_dir);
        let id = recorder.start(mission, domain);
        self.active.insert(id.to_string(), recorder);
        id
    }

    pub fn recorder_mut(&mut self, id: MissionId) -> Option<&mut CotRecorder> {
        self.active.get_mut(&id.to_string())
    }

    /// Save and retire a mission recorder.
    pub async fn complete_mission(&mut self, id: MissionId) -> Result<PathBuf> {
        let mut recorder = self
            .active
            .remove(&id.to_string())
            .ok_or_else(|| Error::NotFound(format!("no active mission {}", id)))?;
        let point = recorder
            .current()
            .ok_or_else(|| Error::Validation("mission has no data".to_string()))?;
        let path = recorder.save_and_reset(None).await?;
        self.completed.push(point);
        Ok(path)
    }

    pub fn get_summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            active_missions: self.active.len(),
            completed_missions: self.completed.len(),
            ..Default::default()
        };
        let active_points = self.active.values().filter_map(|r| r.current.as_ref());
        for point in active_points.chain(self.completed.iter()) {
            summary.total_steps += point.step_count();
            summary.total_errors += point.error_count();
        }
        summary
    }
}
