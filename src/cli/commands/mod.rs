pub mod apply;
pub mod message;
pub mod session;
pub mod show;
pub mod sync;
pub mod transfer;
