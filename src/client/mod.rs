//! Client-side message surface and its HTTP transport.

pub mod api;
pub mod error;
pub mod surface;

pub use api::{ClientConfig, HttpMessagingClient, MessagingApi};
pub use error::{ClientError, ClientResult};
pub use surface::{ChatEntry, DeliveryState, MessageSurface, OpenConversation, escape_html};
