pub mod boxedarray;
pub mod frontend;
pub mod macros;
pub mod num;
