//! TLS directory.

use serde::{Deserialize, Serialize};

/// Thread-local-storage directory: template data range, index slot and
/// the callback list run before the entrypoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tls {
    pub callbacks: Vec<u64>,
    pub addressof_raw_data_start: u64,
    pub addressof_raw_data_end: u64,
    pub addressof_index: u64,
    pub addressof_callbacks: u64,
    pub sizeof_zero_fill: u32,
    pub characteristics: u32,
}
