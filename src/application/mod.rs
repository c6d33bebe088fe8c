pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod options;
pub mod registry;
pub mod repos;
