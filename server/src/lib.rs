//! Chatline messaging server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod db;
pub mod history;
pub mod routes;
pub mod state;
pub mod ws;
