//! Request handlers.

pub mod account;
pub mod billing;
pub mod health;
pub mod jobs;
pub mod uploads;
pub mod videos;

pub use account::*;
pub use billing::*;
pub use health::*;
pub use jobs::*;
pub use uploads::*;
pub use videos::*;
