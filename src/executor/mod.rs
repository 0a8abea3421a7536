pub mod backend;
pub mod channel;
pub mod gesture;
pub mod router;
pub mod safety;
pub mod shell;
pub mod status;
pub mod text_input;
