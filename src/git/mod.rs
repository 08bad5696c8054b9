pub mod clone;
pub mod revision;

pub use clone::shallow_clone;
pub use revision::{check_repo_clean, head_revision, warn_if_dirty};
