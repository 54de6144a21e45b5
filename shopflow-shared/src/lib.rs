pub mod money;
pub mod pii;

pub use money::{format_minor_units, line_total};
pub use pii::Masked;
