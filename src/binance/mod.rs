pub mod interval;
pub mod rest;

pub use rest::{BinanceRest, Ticker24h};
