/// A convenience alias for results of crate operations.
pub type Result<T> = std::result::Result<T, crate::error::Error>;
