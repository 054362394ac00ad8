//! Iterative planning kernel.
//!
//! Runs the plan→execute→verify loop for one goal: synthesize a problem from
//! the current state, short-circuit when the goal already holds, plan, and
//! execute the plan through the effector with synchronous delta application.
//! Failures never abort the loop: planner errors and action failures are fed
//! back into state as comment sentinels and the next iteration re-plans over
//! the altered world.

use crate::KernelState;
use common::Result;
use intelligence::synthesizer::{ProblemSynthesizer, SynthesisOutcome};
use pddl::problem::{extract_goal_predicates, extract_init_block, extract_objects_block};
use pddl::{Fact, FactSet, Planner, PlanningResult};
use std::path::PathBuf;
use std::sync::Arc;
use tools::EffectorGateway;
use tracing::{debug, info, warn};

/// The plan-execute-verify kernel.
pub struct IterativeKernel {
    synthesizer: Arc<ProblemSynthesizer>,
    planner: Arc<dyn Planner>,
    effector: Arc<EffectorGateway>,
    domain_path: PathBuf,
    domain_names: Vec<String>,
    max_iterations: u32,
    state: KernelState,
    current_domain: Option<String>,
}

impl IterativeKernel {
    pub fn new(
        synthesizer: Arc<ProblemSynthesizer>,
        planner: Arc<dyn Planner>,
        effector: Arc<EffectorGateway>,
        domain_path: PathBuf,
        max_iterations: u32,
    ) -> Self {
        let domain_names = vec![synthesizer.profile().name.clone()];
        Self {
            synthesizer,
            planner,
            effector,
            domain_path,
            domain_names,
            max_iterations,
            state: KernelState::new(),
            current_domain: None,
        }
    }

    /// Override the set of routable domain names.
    pub fn with_domain_names(mut self, names: Vec<String>) -> Self {
        self.domain_names = names;
        self
    }

    /// Seed initial facts (regression runs seed the scan result here).
    pub fn seed_facts(&mut self, facts: FactSet) {
        self.state.facts.extend(facts);
    }

    pub fn state(&self) -> &KernelState {
        &self.state
    }

    /// Clear all kernel-owned state.
    pub fn reset(&mut self) {
        self.state.reset();
        self.current_domain = None;
    }

    /// Run the loop for a goal. Returns whether the goal was achieved within
    /// the iteration budget.
    pub async fn run(&mut self, goal: &str) -> Result<bool> {
        if self.current_domain.is_none() {
            let domain = self
                .synthesizer
                .route_domain(goal, &self.domain_names)
                .await?;
            info!(%domain, "kernel routed goal");
            self.current_domain = Some(domain);
        }

        for iteration in 0..self.max_iterations {
            debug!(iteration = iteration + 1, budget = self.max_iterations, "kernel iteration");
            let domain_text = tokio::fs::read_to_string(&self.domain_path).await?;
            let history = self.effector.history();

            let synthesis = match self
                .synthesizer
                .synthesize(goal, self.state.view(&history), &domain_text, iteration)
                .await
            {
                Ok(synthesis) => synthesis,
                Err(e) => {
                    warn!(error = %e, "synthesis failed, feeding back");
                    self.push_sentinel(format!("; Logic Feedback: {}", e));
                    continue;
                }
            };
            self.state.objects = synthesis.objects;

            let problem = match synthesis.outcome {
                SynthesisOutcome::Finished => {
                    info!("goal reported finished by synthesizer");
                    return Ok(true);
                }
                SynthesisOutcome::Problem(problem) => problem,
            };

            // Goal-achieved pre-check: satisfied goals never reach the
            // planner.
            if let Ok(goal_predicates) = extract_goal_predicates(&problem) {
                if goal_predicates.satisfied_by(&self.state.facts) {
                    info!("goal predicates already hold in state");
                    return Ok(true);
                }
            }

            if iteration == 0 {
                self.adopt_baseline(&problem);
            }

            let plan = match self.planner.plan(&domain_text, &problem).await? {
                PlanningResult::Solved(steps) => steps,
                PlanningResult::Failed(failure) => {
                    warn!(%failure, "planning failed");
                    self.push_sentinel(format!("; Logic Feedback: {}", failure));
                    continue;
                }
            };

            if plan.is_empty() {
                info!("planner reports current state satisfies the goal");
                return Ok(true);
            }

            info!(steps = plan.len(), "executing plan chain");
            let mut chain_intact = true;
            for step in &plan {
                let result = self.effector.execute(&step.invocation).await;
                match result {
                    tools::ExecutionResult::Success { message, delta } => {
                        debug!(step = step.step, %message, "step succeeded");
                        delta.apply(&mut self.state.facts);
                        // New facts may surface newly typed objects.
                        self.synthesizer
                            .profile()
                            .type_inference
                            .infer_from_facts(&delta.add, &mut self.state.objects);
                    }
                    tools::ExecutionResult::Failure { message } => {
                        warn!(step = step.step, %message, "step failed, breaking chain");
                        self.push_sentinel(format!("; Error: {}", message));
                        chain_intact = false;
                        break;
                    }
                }
            }

            if chain_intact {
                debug!("chain complete, next iteration verifies the goal");
            }
        }

        info!("iteration budget exhausted");
        Ok(false)
    }

    /// First iteration: adopt the problem's objects and init facts as the
    /// baseline for deterministic re-assembly.
    fn adopt_baseline(&mut self, problem: &str) {
        let declared = extract_objects_block(problem);
        if !declared.is_empty() {
            debug!(objects = declared.len(), "adopted objects from first problem");
            self.state.objects.merge(&declared);
        }
        match extract_init_block(problem) {
            Ok(init) if !init.is_empty() => {
                debug!(facts = init.len(), "adopted base init");
                self.state.base_init = Some(init);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not extract base init"),
        }
    }

    fn push_sentinel(&mut self, text: String) {
        if let Ok(fact) = Fact::parse(&text) {
            self.state.facts.insert(fact);
        }
    }
}
