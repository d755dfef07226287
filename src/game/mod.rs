pub mod ai;
pub mod command;
pub mod command_queue;
pub mod constants;
pub mod model;
pub mod rts;
