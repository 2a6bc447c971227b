pub mod health;
pub mod query;
pub mod search;

pub use health::health_check;
pub use query::query;
pub use search::{get_search, subscribe_search};
