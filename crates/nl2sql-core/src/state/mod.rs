mod states;
mod transitions;

pub use states::PipelineState;
pub use transitions::{transition, AbortReason, BranchFacts, Transition, TransitionError};
