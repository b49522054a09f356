mod connections;
mod engine;
mod task;

pub use connections::*;
pub use engine::*;
pub use task::*;

#[cfg(test)]
mod tests;
