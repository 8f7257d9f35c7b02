pub mod app;
pub mod auth;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod database;
pub mod error;
pub mod fees;
pub mod handlers;
pub mod ledger;
pub mod middleware;
pub mod services;
pub mod state;
