pub mod filter;
pub mod label;
pub mod recommendation;
pub mod stock;
