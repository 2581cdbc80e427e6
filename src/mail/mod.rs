pub mod connection;
pub mod gmail;

#[cfg(test)]
pub mod testing;

pub use connection::{ConnectionSettings, GmailConnection};
