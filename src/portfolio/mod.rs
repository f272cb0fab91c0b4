mod aggregator;
mod models;

pub use aggregator::{holding_metrics, portfolio_snapshot};
pub use models::{HoldingMetrics, PortfolioSnapshot};
