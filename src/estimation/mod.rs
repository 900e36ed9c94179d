pub mod device;
pub mod movement;
pub mod signal;
