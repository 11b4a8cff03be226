// src/lib.rs

pub mod config;
pub mod error;
pub mod models;

pub mod services {
    pub mod binance;
    pub mod kline_store;
}

pub mod jobs;
