pub mod frame_buffer;
pub mod loudness;
