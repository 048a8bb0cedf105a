pub mod agent;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod member;
pub mod splitter;
