//! nsward core types: namespace snapshots, match criteria and watch events.
//!
//! Nothing in this crate performs I/O. The matcher is a pure function of a
//! [`NamespaceSnapshot`] and a [`CriteriaSet`], so it can be exercised without
//! a cluster, a queue or a runtime.

#![forbid(unsafe_code)]

pub mod criteria;
pub mod event;
pub mod snapshot;

pub use criteria::{matches, CriteriaConfig, CriteriaSet, MatchCriterion};
pub use event::{AddUpdateFilter, EventFilter, ReconcileRequest, WatchEvent};
pub use snapshot::{KeyValues, NamespaceSnapshot};

pub mod prelude {
    pub use super::{
        matches, AddUpdateFilter, CriteriaConfig, CriteriaSet, EventFilter, KeyValues, MatchCriterion,
        NamespaceSnapshot, ReconcileRequest, WatchEvent,
    };
}
