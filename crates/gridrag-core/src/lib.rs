#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod chunking;
pub mod config;
pub mod error;
pub mod filter;
pub mod retry;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
