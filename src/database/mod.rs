pub mod connection;
pub mod ledger;
pub mod mongo;

#[cfg(test)]
pub mod memory;
