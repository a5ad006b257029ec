pub mod aggregator;
pub mod cache;
pub mod migrate;
pub mod optimizer;

pub use aggregator::Aggregator;
pub use cache::{CacheStore, DailyRecord, FieldTotals, YearCache};
