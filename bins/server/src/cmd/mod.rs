pub mod offsets;
pub mod serve;
