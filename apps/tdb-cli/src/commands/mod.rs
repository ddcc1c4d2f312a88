pub mod migrations;
pub mod token;

pub use migrations::{ApplyArgs, GenerateArgs};
pub use token::{MintArgs, VerifyArgs};
