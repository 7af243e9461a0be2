//! Distantly-supervised relation extraction with jointly trained sentence
//! and bag classifiers.

pub mod classify;
pub mod config;
pub mod data;
pub mod em;
pub mod error;
pub mod logging;
pub mod model;
pub mod report;

pub use error::{MimlError, Result};
