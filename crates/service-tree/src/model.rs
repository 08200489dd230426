use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable handle of a node inside a [`crate::ServiceTree`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ServiceId(pub(crate) usize);

impl ServiceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One registered service.
#[derive(Clone, Debug)]
pub struct ServiceNode {
    pub(crate) id: ServiceId,
    pub(crate) name: String,
    pub(crate) qualified_name: String,
    pub(crate) parent: Option<ServiceId>,
    pub(crate) children: Vec<ServiceId>,
}

impl ServiceNode {
    pub fn id(&self) -> ServiceId {
        self.id
    }

    /// Local name, unique among siblings.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Globally unique name used as the storage key for grants and rules.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn parent(&self) -> Option<ServiceId> {
        self.parent
    }

    pub fn children(&self) -> &[ServiceId] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

impl fmt::Display for ServiceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name)
    }
}
