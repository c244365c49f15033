// Re-export modules needed for testing
pub mod api;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod geomap;
pub mod location;
pub mod models;
pub mod repository;
pub mod service;
pub mod settings;
