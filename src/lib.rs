//! divergent - structured-document regression differ
//!
//! This library exposes the comparison core: the difference engine, the
//! content-addressed result cache, the bounded decode/compare pipeline and
//! the dual-endpoint dispatcher with its raw-text fallback.

pub mod batch;
pub mod cache;
pub mod cli;
pub mod config;
pub mod constants;
pub mod diff;
pub mod dispatch;
pub mod document;
pub mod logging;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod rules;
pub mod scan;
