pub mod browser;
pub mod budget;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod duration;
pub mod error;
pub mod sync;
