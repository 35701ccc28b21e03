pub mod selector;
pub mod snapshot;
pub mod state;
pub mod world;
