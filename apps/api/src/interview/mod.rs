pub mod engine;
pub mod extractor;
pub mod handlers;
pub mod marker;
pub mod models;
pub mod prompts;
pub mod repository;
pub mod service;
