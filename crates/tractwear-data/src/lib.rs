pub mod loader;

pub use loader::{DataLoadError, load_tuning, load_tuning_file};
