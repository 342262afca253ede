//! Client for the remote generation feed: session transport, response
//! decoding, and cursor traversal.

pub mod client;
pub mod error;
pub mod session;
pub mod types;
pub mod walker;

pub use client::FeedClient;
pub use error::FeedError;
pub use session::{Credential, FeedSession, HttpSession};
pub use types::{Cursor, GenerationRecord, ImageRef, Page};
pub use walker::{CursorWalker, PageDecision, PageHandler, PageSource, Termination, WalkOptions};
