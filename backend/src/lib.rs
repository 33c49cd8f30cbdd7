pub mod config;
pub mod error;
pub mod inference;
pub mod knowledge;
pub mod pages;
pub mod routes;
pub mod storage;
