pub mod concurrency;
pub mod context;
pub mod coordinator;
pub mod load_balancer;
pub mod routing;
pub mod trigger_calculator;


pub use concurrency::{Authorization, ConcurrencyGuard};
pub use context::{ReentryPermit, SchedulerContext};
pub use coordinator::{FireOutcome, SchedulerCoordinator, SchedulerState};
pub use load_balancer::{ConsistentHashRing, Selection};
