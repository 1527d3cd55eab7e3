#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod browser;
pub mod checkpoint;
pub mod chrome;
pub mod config;
pub mod engine;
pub mod extract;
pub mod fetcher;
pub mod frontier;
pub mod limiter;
pub mod sink;
pub mod types;
pub mod utils;
