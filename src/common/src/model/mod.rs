pub mod data_view;
pub mod metric;
pub mod span;
pub mod trace;
