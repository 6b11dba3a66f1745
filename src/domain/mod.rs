pub mod locator;
pub mod resource;
pub mod schema;
pub mod settings;
pub mod value;
