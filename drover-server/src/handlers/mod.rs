pub mod auth;
pub mod blob;
pub mod events;
pub mod jobs;
pub mod ops;
pub mod workers;
