pub mod cards;
pub mod constants;
pub mod consumer;
pub mod db;
pub mod health;
pub mod ingress;
pub mod logging;
pub mod main_helper;
pub mod normalize;
pub mod str_utils;
pub mod streaming;
pub mod types;
pub mod upstream;

pub use types::*;

pub use main_helper::{AppState, Args};
