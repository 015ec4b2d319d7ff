pub mod id;

pub use id::{IdGenerator, UlidGenerator};
