pub mod observer;
pub mod sink;
pub mod source;
pub mod transform;
