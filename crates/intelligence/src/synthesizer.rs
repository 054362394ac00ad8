//! PDDL problem synthesis.
//!
//! Iteration 0 delegates the whole problem file to the LLM, seeded with the
//! domain's textual rules, the current facts, and the execution history.
//! Later iterations compose `:objects` and `:init` deterministically from the
//! kernel's object map and fact set, asking the LLM only for the goal clause.
//! Either path may return the completion sentinel instead of PDDL.

use crate::gateway::{ChatMessage, LlmGateway};
use crate::{strip_code_fences, DomainProfile};
use common::{Error, Result};
use pddl::problem::{
    assemble_problem, build_init_section, build_objects_section, contains_quantifier,
    escape_goal_identifiers, wrap_goal_clause, ObjectMap,
};
use pddl::{FactSet, GOAL_FINISHED};
use std::sync::Arc;
use tracing::{debug, info};

/// Read-only view of the kernel state handed to the synthesizer.
#[derive(Debug, Clone, Copy)]
pub struct StateView<'a> {
    pub facts: &'a FactSet,
    pub objects: &'a ObjectMap,
    pub base_init: Option<&'a FactSet>,
    pub history: &'a [String],
}

/// What one synthesis call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    /// The goal already holds; no problem was produced.
    Finished,
    /// A complete problem file.
    Problem(String),
}

/// Synthesis result: the outcome plus the object map augmented with any
/// newly referenced objects (the kernel adopts it).
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub outcome: SynthesisOutcome,
    pub objects: ObjectMap,
}

/// Problem synthesizer for one domain.
pub struct ProblemSynthesizer {
    gateway: Arc<dyn LlmGateway>,
    profile: DomainProfile,
}

impl ProblemSynthesizer {
    pub fn new(gateway: Arc<dyn LlmGateway>, profile: DomainProfile) -> Self {
        Self { gateway, profile }
    }

    pub fn profile(&self) -> &DomainProfile {
        &self.profile
    }

    /// Synthesize a problem for the current iteration.
    pub async fn synthesize(
        &self,
        goal: &str,
        view: StateView<'_>,
        domain_text: &str,
        iteration: u32,
    ) -> Result<Synthesis> {
        if iteration == 0 {
            self.synthesize_initial(goal, view, domain_text).await
        } else {
            self.synthesize_goal_only(goal, view, domain_text).await
        }
    }

    /// Route a goal to one of the configured domain names via an LLM
    /// classifier; unrecognized answers fall back to the first name.
    pub async fn route_domain(&self, goal: &str, domain_names: &[String]) -> Result<String> {
        if domain_names.is_empty() {
            return Err(Error::Validation("no domains configured".to_string()));
        }
        let prompt = format!(
            "Which domain does this instruction belong to?\nInstruction: \"{}\"\nDomains: {:?}\nReply with the domain name only.",
            goal, domain_names,
        );
        let response = self
            .gateway
            .chat(&[ChatMessage::user(prompt)], 0.0)
            .await?;
        let choice = response.trim().to_lowercase();
        let routed = domain_names
            .iter()
            .find(|name| name.to_lowercase() == choice)
            .cloned()
            .unwrap_or_else(|| domain_names[0].clone());
        info!(goal, domain = %routed, "domain routed");
        Ok(routed)
    }

    async fn synthesize_initial(
        &self,
        goal: &str,
        view: StateView<'_>,
        domain_text: &str,
    ) -> Result<Synthesis> {
        let prompt = format!(
            "You are the [{domain}] logic expert.\nTask: translate the user goal into a PDDL problem over the known environment facts.\n\n{context}\n\nHard constraints:\n1. Never write facts or goals the environment does not support; do not guess.\n2. When the environment facts are empty, the goal must be the single predicate produced by an information-gathering action.\n3. (:init) must contain (= (total-cost) 0).\n4. Never use exists or forall.\n5. Never invent file objects; unknown file names may not appear in the goal.\n\nDomain rules:\n{rules}\n\nDomain definition:\n{domain_text}\n\nOutput only PDDL, or {sentinel}.",
            domain = self.profile.name,
            context = self.memory_context(goal, view),
            rules = self.numbered_rules(),
            sentinel = GOAL_FINISHED,
        );

        let response = self.gateway.chat(&[ChatMessage::user(prompt)], 0.0).await?;
        let pddl_code = strip_code_fences(&response);

        if pddl_code.contains(GOAL_FINISHED) {
            debug!("synthesizer reported goal already finished");
            return Ok(Synthesis {
                outcome: SynthesisOutcome::Finished,
                objects: view.objects.clone(),
            });
        }
        if contains_quantifier(&pddl_code) {
            return Err(Error::Validation(
                "synthesized problem introduces a quantifier".to_string(),
            ));
        }
        Ok(Synthesis {
            outcome: SynthesisOutcome::Problem(pddl_code),
            objects: view.objects.clone(),
        })
    }

    async fn synthesize_goal_only(
        &self,
        goal: &str,
        view: StateView<'_>,
        domain_text: &str,
    ) -> Result<Synthesis> {
        // Merge objects surfaced by new facts before building the sections.
        let mut objects = view.objects.clone();
        self.profile
            .type_inference
            .infer_from_facts(view.facts, &mut objects);

        let objects_section = build_objects_section(&objects);
        let init_section = build_init_section(view.facts, view.base_init);

        let prompt = format!(
            "You are the [{domain}] logic expert.\nTask: given the current state, produce only the (:goal …) clause of a PDDL problem.\n\nKnown objects (:objects):\n    {objects}\nInitial state (:init):\n    {init}\n\n{context}\n\nDomain rules:\n{rules}\n\nDomain definition:\n{domain_text}\n\nRequirements:\n1. Output only the (:goal …) clause, or {sentinel} when the state already satisfies the goal.\n2. Never use exists or forall.\n3. Goal predicates must match the domain's predicates with correctly typed arguments.\n\nExample output:\n(:goal (and (at file_a backup)))",
            domain = self.profile.name,
            objects = if objects_section.is_empty() { "(none)" } else { &objects_section },
            init = init_section,
            context = self.memory_context(goal, view),
            rules = self.numbered_rules(),
            sentinel = GOAL_FINISHED,
        );

        let response = self.gateway.chat(&[ChatMessage::user(prompt)], 0.0).await?;
        let clause = strip_code_fences(&response);

        if clause.contains(GOAL_FINISHED) {
            debug!("synthesizer reported goal already finished");
            return Ok(Synthesis {
                outcome: SynthesisOutcome::Finished,
                objects,
            });
        }

        let goal_clause = escape_goal_identifiers(&wrap_goal_clause(&clause));
        if contains_quantifier(&goal_clause) {
            return Err(Error::Validation(
                "synthesized goal introduces a quantifier".to_string(),
            ));
        }

        // Objects first referenced in the goal get typed from the predicate
        // table; the sections are rebuilt so every goal object is declared.
        self.profile
            .type_inference
            .infer_from_goal(&goal_clause, &mut objects)?;
        let objects_section = build_objects_section(&objects);
        let init_section = build_init_section(view.facts, view.base_init);

        let problem = assemble_problem(
            &self.profile.problem_name(),
            &self.profile.pddl_name,
            &objects_section,
            &init_section,
            &goal_clause,
        );
        debug!(iteration = "n>0", "assembled problem deterministically");
        Ok(Synthesis {
            outcome: SynthesisOutcome::Problem(problem),
            objects,
        })
    }

    fn memory_context(&self, goal: &str, view: StateView<'_>) -> String {
        let facts = if view.facts.is_empty() {
            "(none)".to_string()
        } else {
            view.facts
                .iter()
                .filter(|f| !f.is_comment())
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join("\n")
        };
        let history = if view.history.is_empty() {
            "(none)".to_string()
        } else {
            view.history
                .iter()
                .map(|h| format!("- {}", h))
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!(
            "User goal: {goal}\n\nKnown environment facts (PDDL predicates):\n{facts}\n\nExecution history (recent actions):\n{history}\n\nIf these facts already satisfy the goal completely, reply {sentinel} instead of PDDL.",
            sentinel = GOAL_FINISHED,
        )
    }

    fn numbered_rules(&self) -> String {
        self.profile
            .rules
            .iter()
            .enumerate()
            .map(|(i, rule)| format!("{}. {}", i + 1, rule))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
