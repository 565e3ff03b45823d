pub mod toml_loader;

pub use toml_loader::{load_job_seeds, load_job_seed_file, load_profile};
