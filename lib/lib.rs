pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod notify;
pub mod psa_client;
pub mod queue;
pub mod server;
pub mod state;
pub mod technicians;
pub mod ticket_service;
pub mod worker;
