pub mod base;
pub mod configs;
pub mod dial;
pub mod streaming;
pub mod utils;

#[cfg(test)]
pub mod mock;
