pub mod api;
pub mod config;
pub mod exec;
pub mod handlers;
pub mod keyvalue;
pub mod netif;
pub mod server;
pub mod service;
pub mod session;
pub mod web;
