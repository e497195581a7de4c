pub mod cooldown;
pub mod freshness;
pub mod merge_plan;
pub mod overlap;
