pub mod ai;
pub mod morphology;
pub mod noise;
