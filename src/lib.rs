pub mod app;
pub mod config;
pub mod error;
pub mod forecast;
pub mod model;
pub mod predictor;
pub mod runtime;
pub mod service;
pub mod store;
