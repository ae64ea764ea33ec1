pub mod release;
pub mod resolve;
pub mod ticket;

#[cfg(test)]
pub mod testing;
