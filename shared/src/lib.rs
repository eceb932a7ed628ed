pub mod config;
pub mod coordinator;
pub mod error;
pub mod guard;
pub mod image;
pub mod notification;
pub mod record;
pub mod transfer;
pub mod trigger;

#[cfg(test)]
mod testing;
