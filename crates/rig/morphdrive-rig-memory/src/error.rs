use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RigError {
    /// Rig description could not be parsed.
    #[error("invalid rig description: {0}")]
    Json(#[from] serde_json::Error),

    /// Two bones share a name.
    #[error("duplicate bone '{0}'")]
    DuplicateBone(String),

    /// A bone names a parent the rig does not have.
    #[error("bone '{bone}' has unknown parent '{parent}'")]
    UnknownParent { bone: String, parent: String },
}
