mod mtr_detector;
mod mtr_parser;

pub use mtr_detector::{MtrDetector, MtrRunner, SystemMtr};
pub use mtr_parser::{is_hop_line, parse_hop_line, parse_report};
