//! AeroLOPA seat-map crawler: polite fetching, HTML extraction, label
//! normalization and idempotent persistence.

pub mod airlines;
pub mod cancel;
pub mod db;
pub mod error;
pub mod fetch;
pub mod images;
pub mod metrics;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod settings;
pub mod throttle;
