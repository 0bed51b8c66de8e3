//! hostscheduler-state — hibernation record store.
//!
//! A cluster is hibernated exactly when its resource labels carry a
//! [`HibernationRecord`]: the size of every node pool at the moment
//! `stop` began. Keeping the record on the cluster itself means there
//! is no separate database to lose, it survives process restarts, and
//! operators can see it with the provider's own tooling.
//!
//! # Architecture
//!
//! ```text
//! LabelStore
//!   ├── read(labels)               -> Option<HibernationRecord>
//!   ├── with_record(labels, rec)   -> labels + record  (rejects overwrite)
//!   └── without_record(labels)     -> labels - record
//! ```
//!
//! The backend writes the returned map back in a single call guarded by
//! the provider's label fingerprint.

pub mod error;
pub mod labels;
pub mod store;
pub mod types;

pub use error::{StateError, StateResult};
pub use labels::LabelKeys;
pub use store::{LabelStore, Labels};
pub use types::HibernationRecord;
