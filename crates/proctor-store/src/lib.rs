pub mod answers;
pub mod database;
pub mod error;
pub mod exams;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod users;
pub mod violations;

pub use database::{Database, PoolConfig};
pub use error::StoreError;
