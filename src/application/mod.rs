pub mod bootstrap;
pub mod commands;
pub mod notifications;
pub mod session;
