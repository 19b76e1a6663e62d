//! # Normalizer
//!
//! Turns one intercepted request into canonical change events.
//!
//! | method | events |
//! |--------|--------|
//! | `PUT p` | `Register(p)` |
//! | `DELETE p` | `Unregister(p)` |
//! | `COPY p -> d` | `Register(d)` |
//! | `MOVE p -> d` | `Unregister(p)`, `Register(d)` |
//! | anything else | none |
//!
//! ```
//! use normalizer::EventNormalizer;
//!
//! let normalizer = EventNormalizer::new();
//! let events = normalizer
//!     .normalize("MOVE", "/a", Some("http://dav.example/b"))
//!     .unwrap();
//! assert_eq!(events.len(), 2);
//! assert_eq!(events[0].path(), "/a");
//! assert_eq!(events[1].path(), "/b");
//! ```

mod error;
mod normalizer;
mod path;

pub use contracts::{ChangeEvent, ChangeKind};
pub use error::NormalizationError;
pub use normalizer::{EventNormalizer, RequestMethod};
pub use path::{canonicalize_path, destination_path};
