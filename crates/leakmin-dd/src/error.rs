/// Boxed error carried out of a candidate test.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum DdError {
    /// A boundary check failed, or a verdict flipped during the search.
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("candidate test failed: {0}")]
    Test(#[source] BoxError),
}

impl DdError {
    pub fn is_precondition(&self) -> bool {
        matches!(self, DdError::PreconditionViolation(_))
    }
}
