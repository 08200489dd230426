//! Service tree: named, nested authorization domains.

pub mod errors;
pub mod model;
pub mod spec;
pub mod tree;

pub use errors::TreeError;
pub use model::{ServiceId, ServiceNode};
pub use spec::TreeSpec;
pub use tree::{ServiceTree, Trace, Travel};
