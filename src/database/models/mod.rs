pub mod school;

pub use school::{School, SchoolClass, Section, Student};
