//! Engine configuration, passed explicitly at construction time.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Filesystem path of the sled database.
    pub db_path: PathBuf,
    /// Page size applied when a listing call passes a size of zero.
    pub default_page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("approval.db"),
            default_page_size: 20,
        }
    }
}
