pub mod branch;
pub mod release;
pub mod ticket;
