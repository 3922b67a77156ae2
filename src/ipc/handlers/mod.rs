pub mod core;
pub mod import;
pub mod jobs;
pub mod queries;
pub mod setup;
