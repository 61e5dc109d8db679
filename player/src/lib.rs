pub mod cache;
pub mod playback;
pub mod profile;
pub mod renderer;
