//! MarketRadar: an autonomous web-research agent.
//!
//! A mission takes a free-text goal, drives a browser through search results
//! and content pages, extracts structured data from several sources and
//! streams its progress as [`mission::MissionEvent`]s.

pub mod brain;
pub mod config;
pub mod dom;
pub mod error;
pub mod extractor;
pub mod face;
pub mod goal;
pub mod hands;
pub mod logging;
pub mod memory;
pub mod mission;
pub mod registry;
pub mod types;

pub use brain::{Brain, Decision};
pub use config::Config;
pub use error::MissionError;
pub use mission::{MissionEvent, MissionStream};
pub use registry::{MissionRegistry, MissionState};
