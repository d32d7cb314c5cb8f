pub mod cache;
pub mod dom;
pub mod manifest;
pub mod package;
