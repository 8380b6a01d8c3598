pub mod catalog;
pub mod config;
pub mod descriptor;
pub mod platform;
pub mod protocol;
