pub mod conf;
pub mod detectors;
pub mod error;
pub mod locator;
pub mod probe;
pub mod reporter;
pub mod structures;
pub mod util;
