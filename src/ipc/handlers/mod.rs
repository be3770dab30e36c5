pub mod core;
pub mod grid;
pub mod reports;
pub mod roster;
pub mod setup;
pub mod subexams;
