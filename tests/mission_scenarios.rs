//! End-to-end mission scenarios over the shipped file-management domain.
//!
//! These tests wire the real components together (router, roles, effector,
//! kernel, recorder) with a scripted LLM gateway and a scripted planner, and
//! walk the canonical mission shapes: direct atomic execution, Brain-routed
//! decomposition, and an already-satisfied goal.

use std::path::PathBuf;
use std::sync::Arc;

use agent_core::{CotRecorder, IterativeKernel, MissionRunner};
use intelligence::synthesizer::ProblemSynthesizer;
use intelligence::{DomainProfile, ScriptedGateway};
use pddl::planner::ScriptedPlanner;
use pddl::Fact;
use tools::registry::SkillRegistry;
use tools::transport::LocalTransport;
use tools::EffectorGateway;

fn domain_text() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("pddl_configs/file_management.pddl");
    std::fs::read_to_string(path).expect("canonical domain file")
}

fn facts(items: &[&str]) -> pddl::FactSet {
    items.iter().map(|s| Fact::parse(s).unwrap()).collect()
}

async fn effector_over(storage: PathBuf) -> Arc<EffectorGateway> {
    let registry = Arc::new(SkillRegistry::new());
    let transport = Arc::new(LocalTransport::new(registry, storage));
    Arc::new(EffectorGateway::new(transport, 5))
}

#[tokio::test]
async fn single_atomic_mission_records_one_nerves_success() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("storage");
    tokio::fs::create_dir_all(storage.join("backup")).await.unwrap();
    tokio::fs::write(storage.join("file1"), b"x").await.unwrap();

    let effector = effector_over(storage).await;
    let gateway = Arc::new(ScriptedGateway::new(vec!["(move file1 root backup)"]));
    let mut runner = MissionRunner::new(
        gateway,
        Arc::clone(&effector),
        DomainProfile::file_management(),
        CotRecorder::new(dir.path().join("cot")),
    );
    runner.seed_facts(facts(&[
        "(has_admin_rights)",
        "(at file1 root)",
        "(connected root backup)",
    ]));

    let success = runner.run("移动 file1 到 backup", &domain_text()).await.unwrap();
    assert!(success);

    let point = runner.recorder().current().unwrap();
    assert!(point.brain.is_empty());
    assert_eq!(point.nerves.len(), 1);
    assert_eq!(point.error_count(), 0);
    assert_eq!(effector.history(), vec!["move"]);

    // The delta landed in mission state and on disk.
    assert!(runner.facts().contains(&Fact::parse("(at file1 backup)").unwrap()));
    assert!(!runner.facts().contains(&Fact::parse("(at file1 root)").unwrap()));
    assert!(dir.path().join("storage/backup/file1").is_file());
}

#[tokio::test]
async fn brain_routed_mission_records_both_layers() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("storage");
    tokio::fs::create_dir_all(storage.join("backup")).await.unwrap();
    tokio::fs::write(storage.join("file1"), b"x").await.unwrap();

    let effector = effector_over(storage).await;
    let gateway = Arc::new(ScriptedGateway::new(vec![
        "(scan root)\n(move file1 root backup)",
        "(scan root)",
        "(move file1 root backup)",
    ]));
    let mut runner = MissionRunner::new(
        gateway,
        Arc::clone(&effector),
        DomainProfile::file_management(),
        CotRecorder::new(dir.path().join("cot")),
    );
    runner.seed_facts(facts(&[
        "(has_admin_rights)",
        "(at file1 root)",
        "(connected root backup)",
    ]));

    let success = runner
        .run("如果 root 下有文件则移动到 backup", &domain_text())
        .await
        .unwrap();
    assert!(success);

    let point = runner.recorder().current().unwrap();
    assert_eq!(point.brain.len(), 2);
    assert_eq!(point.nerves.len(), 2);
    assert_eq!(point.error_count(), 0);
    assert_eq!(effector.history(), vec!["scan", "move"]);
}

#[tokio::test]
async fn already_achieved_goal_short_circuits_the_kernel() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("storage");
    tokio::fs::create_dir_all(&storage).await.unwrap();
    let domain_path = dir.path().join("domain.pddl");
    tokio::fs::write(&domain_path, domain_text()).await.unwrap();

    let effector = effector_over(storage).await;
    let gateway = Arc::new(ScriptedGateway::new(vec![
        "file_management",
        "GOAL_FINISHED_ALREADY",
    ]));
    let synthesizer = Arc::new(ProblemSynthesizer::new(
        gateway,
        DomainProfile::file_management(),
    ));
    // An empty scripted planner proves the planner is never consulted.
    let planner = Arc::new(ScriptedPlanner::new(vec![]));

    let mut kernel = IterativeKernel::new(
        synthesizer,
        planner,
        Arc::clone(&effector),
        domain_path,
        5,
    );
    kernel.seed_facts(facts(&["(at file1 backup)"]));

    assert!(kernel.run("移动 file1 到 backup").await.unwrap());
    assert!(effector.history().is_empty());
}
