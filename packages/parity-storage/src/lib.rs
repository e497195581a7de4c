pub mod cache;
pub mod db;
pub mod groups;
pub mod models;
pub mod prices;
pub mod schema;
pub mod stores;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
