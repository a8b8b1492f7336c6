pub mod month;
pub mod readings_frame;
pub mod station;
