pub mod indicators;
pub mod market;
pub mod multi_timeframe;
pub mod scoring;

pub use indicators::{compute_snapshot, IndicatorSnapshot};
pub use market::{classify, MarketConfig, MarketConfigOverride, MarketResolver};
pub use multi_timeframe::{classify_trend, confirm, Confirmation, TrendDirection};
pub use scoring::{evaluate, pick_direction, score_direction, DirectionScore, Rule, RULES};
