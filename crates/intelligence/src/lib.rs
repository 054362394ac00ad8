//! Intelligence layer for the CoT agent.
//!
//! This crate provides the LLM gateway abstraction and the role-specialized
//! clients built on top of it: the Brain task decomposer, the Nerves action
//! decomposer, the Analysis failure diagnostician, the problem synthesizer,
//! the curriculum proposer, and the rule-based task router that decides which
//! layer a goal enters.

use pddl::TypeInference;

pub mod analysis;
pub mod brain;
pub mod curriculum;
pub mod gateway;
pub mod nerves;
pub mod router;
pub mod synthesizer;

pub use analysis::AnalysisRole;
pub use brain::BrainRole;
pub use curriculum::{CurriculumProposer, TaskProposal};
pub use gateway::{ChatMessage, HttpGateway, LlmGateway, ScriptedGateway};
pub use nerves::NervesRole;
pub use router::{Route, TaskRouter};
pub use synthesizer::{ProblemSynthesizer, Synthesis, SynthesisOutcome};

/// Static knowledge about one planning domain: its textual rules for prompt
/// construction and its type-inference table.
#[derive(Debug, Clone)]
pub struct DomainProfile {
    /// Logical name used for routing and file lookup
    pub name: String,
    /// PDDL domain identifier inside problem files
    pub pddl_name: String,
    /// Natural-language rules enumerated in synthesis prompts
    pub rules: Vec<String>,
    /// Predicate-position type table for new objects
    pub type_inference: TypeInference,
}

impl DomainProfile {
    /// The built-in file-management domain.
    pub fn file_management() -> Self {
        Self {
            name: "file_management".to_string(),
            pddl_name: "file-manager".to_string(),
            rules: vec![
                "Scanning a folder is the only way to learn its contents; never invent file objects.".to_string(),
                "Most operations require admin rights; acquire them with get_admin first.".to_string(),
                "A file can only be moved or copied between folders after both are known.".to_string(),
                "Filenames carry dots escaped as _dot_; keep that form in every predicate.".to_string(),
                "Deletion-style effects are reserved for remove/move; copy never drops the source.".to_string(),
            ],
            type_inference: TypeInference::file_management(),
        }
    }

    /// PDDL problem name derived from the domain name.
    pub fn problem_name(&self) -> String {
        format!("{}-problem", self.name.replace('_', "-"))
    }
}

/// Strip a markdown code fence from an LLM response, returning the inner
/// payload. Responses without fences pass through trimmed.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.contains("```") {
        return trimmed.to_string();
    }
    let mut parts = trimmed.split("```");
    let _before = parts.next();
    match parts.next() {
        Some(block) => {
            // Drop a language tag on the first line (```json, ```pddl, …)
            let block = block.trim_start();
            match block.split_once('\n') {
                Some((first, rest))
                    if first.chars().all(|c| c.is_ascii_alphanumeric()) && !first.is_empty() =>
                {
                    rest.trim().to_string()
                }
                _ => block.trim().to_string(),
            }
        }
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences_with_language() {
        let input = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(input), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_code_fences_plain() {
        let input = "```\n(:goal (at f root))\n```";
        assert_eq!(strip_code_fences(input), "(:goal (at f root))");
    }

    #[test]
    fn test_strip_code_fences_passthrough() {
        assert_eq!(strip_code_fences("  GOAL_FINISHED_ALREADY  "), "GOAL_FINISHED_ALREADY");
    }

    #[test]
    fn test_domain_profile_problem_name() {
        let profile = DomainProfile::file_management();
        assert_eq!(profile.problem_name(), "file-management-problem");
    }
}
