#![deny(unused_must_use)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate async_trait;

pub mod config;
pub mod error;
pub mod format;
pub mod health;
pub mod lifecycle;
pub mod model;

pub mod task;
pub mod stream;
pub mod store;
pub mod topology;


pub use config::Config;
pub use error::StreamError;
pub use stream::KStream;
pub use store::WindowStore;
