pub mod community;
pub mod conversation;
pub mod message;
pub mod profile;
