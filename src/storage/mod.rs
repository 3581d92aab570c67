pub mod db;
pub mod models;
mod sessions;
mod tables;
mod users;

pub use db::{Database, DatabaseError};
pub use tables::*;
