pub mod demo;
pub mod stub;

pub use demo::{DemoBackend, FOOD_LABELS};
pub use stub::StubBackend;
