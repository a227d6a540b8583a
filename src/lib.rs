pub mod candle;
pub mod cli;
pub mod error;
pub mod fetch;
pub mod limiter;
pub mod products;
pub mod run;
pub mod store;
pub mod sync;

pub use error::{AppError, Result};
