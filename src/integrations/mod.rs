//! External service integrations.

pub mod delivery {
    pub use crate::delivery::*;
}

pub mod notifier {
    pub use crate::notifier::*;
}
