//! Test utilities for the query engine.
//!
//! This module provides builders for configurations populated with static
//! catalog entries, so engine tests can run without a data-model service.
//!
//! # Feature Flag
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::TestConfigBuilder;
//!
//! let config = TestConfigBuilder::new()
//!     .with_max_search_size(3)
//!     .with_log_group("traces", &["otel-traces"])
//!     .with_data_view(DataView::new("traces"))
//!     .build();
//! ```

mod config_builder;

pub use config_builder::TestConfigBuilder;
