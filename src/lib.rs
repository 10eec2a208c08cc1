pub mod api;
pub mod config;
pub mod dates;
pub mod diagnostics;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod ics;
pub mod model;
pub mod pipeline;
pub mod serve;
pub mod strategy;
