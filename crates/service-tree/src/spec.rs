//! Declarative description of a service tree, as found in configuration files.

use serde::{Deserialize, Serialize};

use crate::errors::TreeError;
use crate::model::ServiceId;
use crate::tree::ServiceTree;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeSpec {
    pub name: String,
    #[serde(default)]
    pub children: Vec<TreeSpec>,
}

impl TreeSpec {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(name: impl Into<String>, children: Vec<TreeSpec>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    /// Builds a tree whose root is this spec.
    pub fn build(&self) -> Result<ServiceTree, TreeError> {
        let mut tree = ServiceTree::new(self.name.clone())?;
        let root = tree.root();
        for child in &self.children {
            child.register(&mut tree, root)?;
        }
        Ok(tree)
    }

    fn register(&self, tree: &mut ServiceTree, parent: ServiceId) -> Result<(), TreeError> {
        let id = tree.add_child(parent, self.name.clone())?;
        for child in &self.children {
            child.register(tree, id)?;
        }
        Ok(())
    }
}

impl Default for TreeSpec {
    fn default() -> Self {
        Self::leaf("nonebot")
    }
}
