//! Pure traffic analytics: time buckets, counter accumulation and session
//! boundary decisions. Nothing in here touches the database.

pub mod aggregator;
pub mod buckets;
pub mod sessionizer;

pub use aggregator::{AggregateBatch, EventFacts, SessionAggregateBatch, StatusClass, TrafficCounts};
pub use buckets::{check_timestamp, day_bounds, day_bucket, hour_bounds, hour_bucket};
pub use sessionizer::{next_step, SessionCache, SessionState, SessionStep, SESSION_GAP_SECONDS};
