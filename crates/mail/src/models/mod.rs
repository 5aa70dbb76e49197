//! Domain models for mail entities

mod account;
mod category;
mod label;
mod message;
mod page;

pub use account::{Account, Checkpoint, OAuthCredential};
pub use category::{Category, CategoryId};
pub use label::{Label, LabelId, LabelTable};
pub use message::{Email, EmailBuilder, EmailId, MessageId, RemoteMessage};
pub use page::{PageRequest, PaginatedResult};
