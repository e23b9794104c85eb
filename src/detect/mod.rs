mod backend;
mod backends;
mod registry;

pub use backend::DetectorBackend;
pub use backends::{DemoBackend, StubBackend, FOOD_LABELS};
pub use registry::{BackendFactory, BackendRegistry};
