pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced inside individual cache tiers.
///
/// [`TieredCache`](crate::TieredCache) absorbs these at the tier boundary; they only surface
/// to callers that drive a tier directly.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("shared backend {backend} is unavailable: {reason}")]
    Unavailable {
        backend: &'static str,
        reason: String,
    },

    #[error("value of {size} bytes exceeds the tier limit of {limit} bytes")]
    ValueTooLarge { size: u64, limit: u64 },

    #[error("disk tier cannot free enough space: need {needed} bytes, budget is {budget} bytes")]
    BudgetExhausted { needed: u64, budget: u64 },
}

impl CacheError {
    /// Whether the error only means "the backend could not be reached right now".
    pub fn is_connectivity(&self) -> bool {
        match self {
            CacheError::Unavailable { .. } => true,
            CacheError::Redis(err) => {
                err.is_io_error()
                    || err.is_timeout()
                    || err.is_connection_refusal()
                    || err.is_connection_dropped()
            }
            _ => false,
        }
    }
}
