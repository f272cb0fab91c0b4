mod engine;
mod models;

pub use engine::ReconciliationEngine;
pub use models::{
    DuplicateGroup, GroupStatus, ReconcileError, Resolution, ResolutionAction, ResolutionOrigin,
};
