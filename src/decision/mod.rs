pub mod gateway;
pub mod parser;
pub mod prompt;
