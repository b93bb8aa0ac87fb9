pub mod assets;
pub mod log_msg;
pub mod response;
pub mod shell;
pub mod text;
