pub mod config;
pub mod health;
pub mod me;
pub mod relay;
