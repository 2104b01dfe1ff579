pub mod apdu;
pub mod card;
pub mod config;
pub mod decode;
pub mod error;
pub mod format;
pub mod policy;
pub mod profile;
pub mod reader;
pub mod transcript;
pub mod utils;
