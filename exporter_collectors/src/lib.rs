pub mod batch;
pub mod config;
pub mod discovery;
pub mod lister;
pub mod parser;
pub mod runner;
pub mod storage;
pub mod updater;

pub use batch::BatchUpdater;
pub use config::{DiscoveryConfig, ExporterConfig, ListenConfig};
pub use discovery::{InclusionPredicate, Tagged};
pub use lister::ResourceLister;
pub use parser::{load_config_from_file, parse_config_from_str, read_config_from_file};
pub use runner::{spawn_runners, UpdateRunner};
pub use storage::StorageUpdater;
pub use updater::{CollectorContext, CycleReport, DynUpdater, Updater, UpdaterRegistry, KNOWN_UPDATERS};
