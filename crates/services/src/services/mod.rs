pub mod events;
pub mod history;
pub mod jobs;
pub mod multiplexer;
pub mod store;
