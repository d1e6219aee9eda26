//! Packaging state machine — buffer, packager, pending registry,
//! escalation scheduler and resolution handler.

pub mod buffer;
pub mod escalation;
pub mod model;
pub mod packager;
pub mod registry;
pub mod resolution;

pub use buffer::{Intake, IntakeRules, MessageBuffer};
pub use escalation::{EscalationHandle, EscalationScheduler};
pub use model::{Package, PackageState, ResolutionOutcome, ResolutionReport};
pub use packager::Packager;
pub use registry::PendingRegistry;
pub use resolution::ResolutionHandler;
