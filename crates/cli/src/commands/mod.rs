pub mod chat;
pub mod memory;
pub mod onboard;
pub mod runtime;
pub mod status;
