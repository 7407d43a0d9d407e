pub mod config;
pub mod drift_store;
pub mod error;
pub mod schema;
pub mod store;

pub use config::{
    CONFIG_FILE, DATA_DIR_ENV, DB_FILE, default_base_dir, load_config, parse_config,
    resolve_base_dir,
};
pub use drift_store::SqliteDriftStore;
pub use error::{Result, StoreError};
pub use store::{Store, StoreStats};
