pub mod api;
pub mod config;
pub mod db;
pub mod directory;
pub mod http;
pub mod ids;
pub mod ipc;
pub mod ledger;
pub mod service;
pub mod state;
