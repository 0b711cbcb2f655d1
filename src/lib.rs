pub mod config;
pub mod draft;
pub mod error;
pub mod localization;
pub mod module;
pub mod navigation;
pub mod player;
pub mod progress;
pub mod quiz;
pub mod store;
pub mod utils;
