pub mod engine;
pub mod local_watcher;
pub mod log;
pub mod mime;
pub mod pool;
pub mod projection;
pub mod queue;
pub mod transfer;
