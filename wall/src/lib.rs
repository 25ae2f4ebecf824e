pub mod admin;
pub mod app;
pub mod cli;
pub mod composer;
pub mod config;
pub mod display;
pub mod error;
pub mod i18n;
pub mod memory;
pub mod model;
pub mod realtime;
pub mod remote;
pub mod rest;
pub mod session;
pub mod store;
pub mod view;

pub use composer::{Composer, Draft};
pub use error::{WallError, WallResult};
pub use memory::MemoryBackend;
pub use rest::RestBackend;
pub use session::Session;
pub use store::FeedStore;
pub use view::FeedView;
