pub mod amount;
pub mod timers;
