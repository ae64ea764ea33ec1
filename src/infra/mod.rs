pub mod git;
pub mod trac;
