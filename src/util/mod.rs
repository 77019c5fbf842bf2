mod fsx;

pub use fsx::{atomic_write, unique_temp_path};
