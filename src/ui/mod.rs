pub mod logs;
pub mod spinner;
pub mod status;
