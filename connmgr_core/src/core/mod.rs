pub mod context;
pub mod errors;
pub mod process;
pub mod supervisor;
