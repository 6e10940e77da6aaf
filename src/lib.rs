pub mod config;
pub mod source;
pub mod system;
pub mod tracking;
pub mod viz;
