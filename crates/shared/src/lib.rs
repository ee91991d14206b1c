// mapnav shared library
// Logging bootstrap, configuration, binary decoding and the common Point type

pub mod config;
pub mod log;
pub mod point;
pub mod util;

pub use point::Point;
