pub mod enums;
pub mod error;
pub mod models;
pub mod schema;
pub mod settings;
pub mod state;
pub mod utils;
