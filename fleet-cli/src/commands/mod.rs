pub mod cache;
pub mod validate;
