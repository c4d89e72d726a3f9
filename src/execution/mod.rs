pub mod confirm;
pub mod persistence;
pub mod scheduler;
pub mod types;
