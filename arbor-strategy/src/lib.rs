pub mod opportunity;
pub mod variance;

pub use opportunity::{calculate_profit_percent, build_opportunity, FeeBreakdown, Opportunity};
pub use variance::{VarianceHistory, VarianceRecord, VarianceStats};
