pub mod walker;
pub mod watcher;
