mod dual;
mod side;

pub use dual::{validate, Classification, DualTimer, ValidationLimits, ValidationReport};
pub use side::{Side, SideSnapshot, SideTimer, TimerPhase};
