//! Storage layer (Redis).

pub mod store;

pub use store::StateStore;

/// Key layout in the backing store.
pub mod keys {
    use crate::models::Environment;

    /// Sorted set: element = activity id, score = next-poll epoch seconds.
    pub const SCHEDULE: &str = "live-activities:schedule";

    /// Hash holding one activity record under field `data`.
    pub fn activity_data(id: &str) -> String {
        format!("live-activity:data:{id}")
    }

    /// Set of raw widget device tokens for an environment.
    pub fn widget_tokens(environment: Environment) -> String {
        format!("widget-tokens:{}", environment.as_str())
    }
}
