//! Unsubscribe support
//!
//! Link extraction and validation, plus the executor that operates
//! unsubscribe pages on the user's behalf.

mod executor;
mod http;
mod link;

pub use executor::{
    PageDriver, PageSession, UnsubscribeErrorKind, UnsubscribeResult, Unsubscriber, parse_wait,
    usable_link,
};
pub use http::HttpPageDriver;
pub use link::{extract_unsubscribe_link, is_valid_unsubscribe_link};
