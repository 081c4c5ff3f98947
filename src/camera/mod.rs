pub mod descriptor;
pub mod ffmpeg_source;
pub mod frame;
pub mod jpeg;
#[cfg(test)]
pub mod testing;
pub mod traits;
