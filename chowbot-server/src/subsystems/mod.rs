pub mod extract;
pub mod nutrition;
pub mod order;
pub mod sweeper;
