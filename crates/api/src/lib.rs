pub mod admin;
pub mod broadcaster;
pub mod ws;

pub use admin::AdminServer;
pub use broadcaster::LogBroadcaster;
