//! Background loops for continuous processing.

pub mod replan_loop;
