pub mod config;
pub mod paths;
pub mod types;
pub mod update;

pub use config::{CyclePolicy, ServerConfig, StoreBackend, StoreSettings};
pub use paths::{fields, level_field, open_field, timing, validate_path, ROOT};
pub use types::*;
pub use update::{validate_level, BinUpdate};
