pub mod conversations;
pub mod directory;
pub mod message_store;
pub mod messaging;
