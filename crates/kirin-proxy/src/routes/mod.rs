pub mod health;
pub mod service;
