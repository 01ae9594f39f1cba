//! Cursors: live, filtered, sorted views over the document cache.
//!
//! A cursor keeps the subset of cached documents that satisfy its predicate,
//! ordered by its sort key. A snapshot cursor only changes on `refresh()`;
//! an attached cursor follows every cache mutation and re-emits the effect
//! on its own subset as `Added` / `Removed` / `Changed` events.
//!
//! # Example
//!
//! ```ignore
//! let open = db.find(
//!     &json!({ "status": "open" }),
//!     CursorOptions::default().sorted_by("priority").keepalive(),
//! )?;
//! open.on(|event| println!("{:?}", event));
//! for ticket in open.fetch() {
//!     println!("{}", ticket.id);
//! }
//! open.close();
//! ```

mod options;
mod subset;
mod view;

pub use options::{CursorOptions, Sort, SortFn, Transform};
pub use view::{Cursor, CursorEvent};
