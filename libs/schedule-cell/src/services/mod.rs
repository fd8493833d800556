pub mod schedule;
pub mod slots;

pub use schedule::*;
pub use slots::*;
