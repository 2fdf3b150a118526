pub mod adapter;
pub mod config;
pub mod detector;
pub mod geometry;
pub mod landmark;
pub mod peer;
pub mod protocol;
pub mod session;
