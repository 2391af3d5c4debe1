//! Task scheduling: priority queue, worker pool, retry classification and
//! size-based timeout tiers

mod pool;
mod queue;
mod retry;
mod tier;

pub use pool::WorkerPool;
pub use queue::{QueueEntry, QueueStats, TaskQueue};
pub use retry::{default_rules, RetryClassifier, RetryDecision, RetryRule, RetryStrategy};
pub use tier::SubjectTier;
