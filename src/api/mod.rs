// Thin namespace wrapper for API-layer components
pub mod handlers {
    pub use crate::handlers::*;
}

pub mod routes {
    pub use crate::routes::*;
}

pub mod auth {
    pub use crate::auth::*;
}

pub mod openapi {
    pub use crate::openapi::*;
}
