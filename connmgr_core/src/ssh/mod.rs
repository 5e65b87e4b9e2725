pub mod keys;
pub mod options;
pub mod probe;
