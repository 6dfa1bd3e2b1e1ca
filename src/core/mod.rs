// Domain-layer modules and shared errors/models
pub mod ingestion {
    pub use crate::ingestion::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod rate_limiter {
    pub use crate::rate_limiter::*;
}

pub mod validation {
    pub use crate::validation::*;
}

pub mod errors {
    pub use crate::errors::*;
}
