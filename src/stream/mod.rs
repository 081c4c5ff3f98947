pub mod capture;
pub mod mjpeg;
pub mod producer;
pub mod slot;
pub mod supervisor;
