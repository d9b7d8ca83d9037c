pub mod constituents;
pub mod run;
