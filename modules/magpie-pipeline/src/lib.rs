pub mod cursor;
pub mod fetcher;
pub mod processor;
pub mod rate;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod strategy;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod trends;

pub use cursor::CursorStore;
pub use fetcher::MentionFetcher;
pub use processor::{BatchReport, MentionProcessor, ProcessOutcome};
pub use rate::RateLimiter;
pub use retry::RetryPolicy;
pub use scheduler::{JobState, JobStatus, Scheduler};
pub use service::{MentionService, ServiceStats};
pub use store::{MemoryStateStore, PgStateStore, StateStore};
pub use strategy::{ContentStrategy, ReplyTone, StrategyWeights};
pub use traits::{ResponseGenerator, SocialPlatformClient};
pub use trends::{TrendRepo, TrendResearcher, TrendSnapshot};
