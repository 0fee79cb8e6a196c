pub mod accumulator;
pub mod capture;
pub mod decode;

pub use accumulator::Accumulator;
pub use capture::{AudioChunk, CaptureSource, FileCapture};
pub use decode::{decode_to_pcm, pcm_to_wav};
