pub mod auth;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod http;
pub mod model;
pub mod module;
pub mod repository;
pub mod resolver;
pub mod runtime;
pub mod selector;
pub mod service;
pub mod source;
pub mod state;
