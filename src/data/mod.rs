//! Data layer module
//!
//! - `UserStore`: the persistence seam the auth core depends on
//! - `Database`: SQLite implementation (sqlx, embedded migrations)

mod database;
mod models;
mod store;

pub use database::Database;
pub use models::*;
pub use store::UserStore;

#[cfg(test)]
pub use store::MockUserStore;
