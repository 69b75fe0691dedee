//! Stateless cursor pagination

pub mod cursor;
pub mod service;

pub use cursor::{CursorCodec, CursorError, CursorPayload};
pub use service::{Fetched, Page, PageMeta, PageRequest, PaginationService};
