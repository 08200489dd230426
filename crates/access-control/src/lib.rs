//! Hierarchical permission and rate-limit enforcement for chatbot services.
//!
//! Services form a tree; grants and quotas attached to a node apply to its
//! descendants. A permission check walks the subjects of an invocation (most
//! specific first) and stops at the first explicit grant found anywhere on the
//! ancestor chain. Rate limiting charges a token on every applicable rule in a
//! single transaction, keeping all of them or none.

pub mod api;
pub mod config;
pub mod errors;
pub mod events;
pub mod model;
pub mod permission;
pub mod rate_limit;
pub mod subject;
pub mod sweeper;
pub mod token;

pub use api::AccessControl;
pub use config::{AccessControlConfig, SweeperConfig};
pub use errors::{AccessError, AccessResult};
pub use events::{
    ListenerError, PermissionEvent, PermissionEventKind, PermissionListener, PermissionObservers,
};
pub use model::{Permission, RateLimitRule};
pub use permission::PermissionStore;
pub use rate_limit::{parse_time_span, RateLimitStore, MAX_TIME_SPAN};
pub use subject::{ChatSubjectExtractor, InvocationContext, SubjectExtractor, SUBJECT_ALL};
pub use sweeper::{sweep_once, TokenSweeper};
pub use token::{Clock, ManualClock, SystemClock, TokenEngine};

pub use ac_access_store::{Admission, StorageBackend, StorageConfig};
pub use ac_service_tree::{ServiceId, ServiceNode, ServiceTree, TreeSpec};
