pub mod config;
pub mod util;

pub mod model;
pub mod schema;
pub mod serialization;
