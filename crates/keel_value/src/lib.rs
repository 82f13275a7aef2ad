//! # Keel Value
//!
//! Dynamic attribute values for Keel records.
//!
//! Records carry their attributes as a map from attribute name to [`Value`].
//! The collaborator layer produces these maps from whatever wire format it
//! speaks; this crate only fixes the in-memory shape and the conversions
//! to and from `serde_json`.
//!
//! ## Usage
//!
//! ```
//! use keel_value::{attributes, Value};
//! use serde_json::json;
//!
//! let attrs = attributes(json!({ "name": "Scumbag Dale", "age": 42 })).unwrap();
//! assert_eq!(attrs.get("name"), Some(&Value::from("Scumbag Dale")));
//! assert_eq!(attrs.get("age").and_then(Value::as_integer), Some(42));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod json;
mod value;

pub use error::{ValueError, ValueResult};
pub use json::attributes;
pub use value::{Attributes, Value};
