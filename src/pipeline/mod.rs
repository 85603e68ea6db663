pub mod extraction;
pub mod generation;
