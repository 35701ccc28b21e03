pub mod protocol;
pub mod session;
pub mod status_store;
