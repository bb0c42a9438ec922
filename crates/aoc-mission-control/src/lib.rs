pub mod config;
pub mod handlers;
pub mod server;

pub use handlers::{
    handler_for, Clock, Handler, MissionControl, StoreHandle, StoreLocation, SystemClock,
    HANDLERS,
};
