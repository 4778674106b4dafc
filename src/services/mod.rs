//! Network-facing services used by the merge pipeline

pub mod stream_prober;

pub use stream_prober::{HttpProbe, LivenessProber, ProbeReport, StreamProbe};
