//! Translation of requests into backend search bodies.

pub mod batcher;
pub mod dsl;
pub mod duration;
pub mod filter;
pub mod planner;
pub mod view_query;
