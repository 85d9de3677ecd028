pub mod connection;
pub mod countdown;
pub mod dispatcher;
pub mod workflow;
