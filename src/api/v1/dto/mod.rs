pub mod me;
pub mod relay;
