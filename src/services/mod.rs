pub mod apply;
pub mod dictionary;
pub mod fetch;
pub mod gate;
pub mod matcher;
pub mod observer;
pub mod package_store;
pub mod session;
pub mod storage;
