//! koji-sync: synchronizes a Koji build-system hub's declarative object
//! state with locally authored YAML documents.
//!
//! Pipeline: template expansion (`namespace`) -> dependency resolution
//! (`resolver`) -> topological solve with cycle-breaking splits (`solver`)
//! -> batched three-phase change processing (`processor`), orchestrated end
//! to end by `workflow`.

pub mod config;
pub mod error;
pub mod hub;
pub mod loader;
pub mod model;
pub mod namespace;
pub mod processor;
pub mod resolver;
pub mod smart_string;
pub mod solver;
pub mod template;
pub mod types;
pub mod workflow;

pub use error::{FixSuggestion, SyncError};
pub use model::Object;
pub use namespace::{Namespace, Redefine};
pub use processor::{Processor, ProcessorSummary};
pub use resolver::{Report, Resolver};
pub use solver::{Emission, Solver};
pub use types::{Key, ProfileName};
pub use workflow::{CompareWorkflow, RunOutcome, SyncWorkflow, WorkflowConfig, WorkflowState};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sync_workflow_runs_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tags.yaml"), "type: tag\nname: f40-build\n").unwrap();

        let config = WorkflowConfig::new(vec![dir.path().to_path_buf()], ProfileName::new("mock").unwrap());
        let mut workflow = SyncWorkflow::new(config);
        let outcome = workflow.run().await.unwrap();
        match outcome {
            RunOutcome::Completed { summary, .. } => assert_eq!(summary.total_objects, 1),
            RunOutcome::Paused => panic!("did not expect a pause"),
        }
    }

    #[test]
    fn test_key_roundtrips_through_solver_closure() {
        let tag = model::kinds::Tag::new("f40-build".to_string()).unwrap();
        let object = Object::Tag(tag);
        let solver = Solver::new(vec![object]);
        let emissions = solver.solve().unwrap();
        assert_eq!(emissions.len(), 1);
    }
}
