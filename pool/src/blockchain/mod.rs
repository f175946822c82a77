/// Node-facing side of share validation: template lookup, proof-of-work
/// evaluation and block submission.

pub mod template;

pub use template::{
    diff1_target, target_from_difficulty, BlockCandidate, HeaderTemplate, PowCheck, TemplateCache,
    TemplateSource, TemplateState,
};
