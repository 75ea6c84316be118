pub mod controller;
pub mod task;
pub mod types;
