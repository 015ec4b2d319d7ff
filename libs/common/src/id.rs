use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = signal_common::id::prefixed_ulid("cli");
/// assert!(id.starts_with("cli_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Source of opaque, globally unique client identifiers.
///
/// The connection server never inspects the ids it hands out, so any
/// implementation that never repeats a value is acceptable.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> String;
}

/// Default generator: prefixed ULIDs.
#[derive(Debug, Clone)]
pub struct UlidGenerator {
    prefix: &'static str,
}

impl UlidGenerator {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix }
    }
}

impl Default for UlidGenerator {
    fn default() -> Self {
        Self::new(prefix::CLIENT)
    }
}

impl IdGenerator for UlidGenerator {
    fn new_id(&self) -> String {
        prefixed_ulid(self.prefix)
    }
}

/// Well-known ID prefixes.
pub mod prefix {
    pub const CLIENT: &str = "cli";
}
