pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod resource;

pub use config::Config;
pub use error::*;
pub use event::*;
pub use message::*;
pub use resource::*;
