pub mod audio;
pub mod crypto;
pub mod encoder;
pub mod framer;
pub mod pacer;
pub mod playback;
pub mod queue;
