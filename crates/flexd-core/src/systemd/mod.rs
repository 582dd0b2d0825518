pub mod differ;
pub mod manager;
pub mod unit_parser;

pub use differ::{compare, compute_deltas, is_unit_file, Comparison, Deltas};
pub use manager::{RecordingSystemdManager, SystemctlManager, SystemdManager};
