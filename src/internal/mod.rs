pub mod error;
pub mod feed;
pub mod gateway;
pub mod models;
pub mod notification;
pub mod push;
pub mod session;
pub mod thread;
pub mod token;
