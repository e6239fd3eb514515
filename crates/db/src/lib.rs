pub mod artifacts;
pub mod checkpoints;
pub mod messages;
pub mod models;
pub mod pool;
pub mod threads;

pub use sqlx::SqlitePool;
