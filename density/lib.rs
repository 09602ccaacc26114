#![deny(dead_code)]
#![deny(unused_imports)]

pub mod cv;
pub mod data;
pub mod estimate;
pub mod functional;
pub mod preprocess;
pub mod test_fixtures;
