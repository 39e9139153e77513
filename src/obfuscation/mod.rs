// Traffic mimicry module
//
// Shapes outbound traffic to stay inside the behavioral envelope of
// the currently fronted domain: the generator samples per-packet
// delay and size decisions from the active preset, the shaper drives
// a multiplexed substream with them.

pub mod generator;
pub mod shaper;

pub use generator::TrafficGenerator;
pub use shaper::run_shaper;
