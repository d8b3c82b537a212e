//! Shaping of raw search responses into wire responses.

pub mod metric;
pub mod time;
pub mod view;
