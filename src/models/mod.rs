pub mod record;
pub mod rows;

pub use record::LogRecord;
pub use rows::{DailyAggregate, EntryDaily, FirstSeen, HourlyAggregate, SessionDaily, SessionRow};
