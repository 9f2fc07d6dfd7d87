pub mod generation;
pub mod item;
