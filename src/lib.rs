//! dotvid: converts a video source into a halftone/dot representation,
//! both for live preview and for frame-accurate export to a video file.

pub mod capture;
pub mod dot_model;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod play;
pub mod render;
pub mod source;
