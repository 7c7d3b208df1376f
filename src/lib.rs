// Library exports for Mood Mirror - webcam expression mirror

pub mod camera;
pub mod config;
pub mod detection;
pub mod error;
pub mod expression;
pub mod inference;
pub mod loader;
pub mod models;
pub mod presentation;
pub mod ui;
