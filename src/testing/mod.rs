//! Testing infrastructure: collaborator traits and mock implementations.
//!
//! The traits here are the loop's only view of the outside world. Real
//! implementations live in `loop::operations`; the mocks enable
//! deterministic unit and integration tests without processes, networks,
//! or a file system.

pub mod mocks;
pub mod traits;

pub use mocks::{
    MockChangeApplier, MockDecisionProvider, MockDependencyResolver, MockEscalationSink,
    MockPublisher, MockQualityRunner, MockStateStore, MockTestRunner,
};
pub use traits::{
    ChangeApplier, ChangeOutcome, CheckOutcome, Decision, DecisionProvider, DependencyResolver,
    EscalationSink, Publisher, QualityRunner, StateStore, TestOutcome, TestRunner,
};
