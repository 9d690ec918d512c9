//! Small support utilities.

mod det_rng;

pub use det_rng::DetRng;
