//! Testing infrastructure for diary-pilot.
//!
//! - **Mocks**: [`ScriptedPage`], an in-memory [`PageDriver`](crate::browser::PageDriver)
//!   with call recording and click/navigation hooks
//! - **Fixtures**: a scripted diary portal and sample entries (test-only)
//!
//! # Example
//!
//! ```rust,ignore
//! use diary_pilot::testing::ScriptedPage;
//!
//! let page = ScriptedPage::new()
//!     .with_element("css=input[name='hours']")
//!     .with_page_text("Student diary");
//!
//! assert_eq!(page.locate_count("css=input[name='hours']"), 0);
//! ```

#[cfg(test)]
pub mod fixtures;
pub mod mocks;

pub use mocks::*;
