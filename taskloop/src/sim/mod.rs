//! Scenario simulation: a fact world moved by scheduled events and by the
//! effects of rule-resolved actions.

pub mod build;
pub mod executor;
pub mod world;

pub use build::{build_root, build_task, factory};
pub use executor::{Resolution, RuleBook, SimExecutor};
pub use world::{SimWorld, WorldHandle};
