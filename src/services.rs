pub mod quarter_gate;
pub mod reshaper;

pub use quarter_gate::{GateDecision, QuarterGate};
pub use reshaper::{LayoutCheck, LayoutRule, LongRow, ReshapeError, Reshaper, SheetLayout};
