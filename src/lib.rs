pub mod assets;
pub mod config;
pub mod error;
pub mod estimation;
pub mod occupancy;
pub mod pipeline;
pub mod spatial;
pub mod timestamp;
