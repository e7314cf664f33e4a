pub mod error_kind;
pub mod verdict;

pub use error_kind::ErrorKind;
pub use verdict::{Failure, Stage, Verdict};
