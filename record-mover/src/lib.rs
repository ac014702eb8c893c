pub mod channel;
pub mod config;
pub mod emit;
pub mod error;
pub mod monitor;
pub mod observe;
pub mod pipeline;
pub mod record;
pub mod route;
pub mod source;
pub mod validate;
