//! Orchestration core for the CoT agent.
//!
//! This crate coordinates the planning-execution-evolution loop: the
//! iterative kernel driving plan→execute→verify cycles, the mission runner
//! producing Chain-of-Thought training data through the Brain/Nerves roles,
//! the evolution loop minting new skills inside a sandbox, the regression
//! guard replaying historical tasks before promotion, and the trace recorder.

use intelligence::synthesizer::StateView;
use pddl::problem::ObjectMap;
use pddl::FactSet;

pub mod evolution;
pub mod kernel;
pub mod mission;
pub mod recorder;
pub mod regression;

pub use evolution::{EvolutionLoop, EvolutionOutcome};
pub use kernel::IterativeKernel;
pub use mission::MissionRunner;
pub use recorder::{BatchRecorder, CotDataPoint, CotRecorder};
pub use regression::{RegressionEntry, RegressionGuard};

/// State owned exclusively by the kernel.
///
/// Everything the problem synthesizer needs is passed as a read-only
/// [`StateView`]; only the kernel mutates facts, objects, and the base-init
/// baseline.
#[derive(Debug, Clone, Default)]
pub struct KernelState {
    /// Active fact set, including feedback sentinels.
    pub facts: FactSet,
    /// Object-type map accumulated across iterations.
    pub objects: ObjectMap,
    /// `:init` baseline captured from the first synthesized problem.
    pub base_init: Option<FactSet>,
}

impl KernelState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view for the synthesizer.
    pub fn view<'a>(&'a self, history: &'a [String]) -> StateView<'a> {
        StateView {
            facts: &self.facts,
            objects: &self.objects,
            base_init: self.base_init.as_ref(),
            history,
        }
    }

    pub fn reset(&mut self) {
        self.facts.clear();
        self.objects = ObjectMap::new();
        self.base_init = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pddl::Fact;

    #[test]
    fn test_kernel_state_view_borrows() {
        let mut state = KernelState::new();
        state.facts.insert(Fact::parse("(at f root)").unwrap());
        state.objects.assign("f", "file");

        let history = vec!["scan".to_string()];
        let view = state.view(&history);
        assert_eq!(view.facts.len(), 1);
        assert_eq!(view.objects.get("f"), Some("file"));
        assert!(view.base_init.is_none());
    }

    #[test]
    fn test_kernel_state_reset() {
        let mut state = KernelState::new();
        state.facts.insert(Fact::parse("(at f root)").unwrap());
        state.base_init = Some(FactSet::new());
        state.reset();
        assert!(state.facts.is_empty());
        assert!(state.base_init.is_none());
    }
}
