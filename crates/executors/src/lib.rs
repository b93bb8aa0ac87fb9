pub mod command;
pub mod local;
pub mod process;
pub mod registry;
