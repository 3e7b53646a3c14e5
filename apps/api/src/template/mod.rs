pub mod builtin;
pub mod catalog;
pub mod evaluator;
pub mod handlers;
pub mod models;
pub mod validator;
