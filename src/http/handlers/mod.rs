pub mod core;
pub mod fees;
