//! Cross-run aggregation and provider ranking.
//!
//! This module groups ingested metric records by provider and variable,
//! computes medians, spreads and per-day trends, ranks providers per
//! variable and overall, and composes the comparative report.

pub mod aggregate;
pub mod analyzer;
pub mod ranking;
pub mod types;
pub mod utility;
