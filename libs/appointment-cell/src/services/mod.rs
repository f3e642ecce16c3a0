pub mod booking;
pub mod lifecycle;
pub mod notify;
pub mod queue;
pub mod schedule;
pub mod sweep;
