//! Role handlers and identity plumbing shared by the barge binaries.

#![warn(clippy::all)]

pub mod identity;
pub mod receiver;
pub mod uploader;

pub use receiver::ReceiverRole;
pub use uploader::UploaderRole;
