use thiserror::Error;

/// Errors raised while registering services into the tree.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("service name must not be empty")]
    EmptyName,
    #[error("service name '{0}' must not contain '.'")]
    InvalidName(String),
    #[error("'{parent}' already has a child named '{name}'")]
    DuplicateSibling { parent: String, name: String },
    #[error("qualified name '{0}' is already registered")]
    DuplicateQualifiedName(String),
    #[error("unknown parent service id {0}")]
    UnknownParent(usize),
}
