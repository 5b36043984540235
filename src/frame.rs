use crate::error::DotvidError;

pub const BYTES_PER_PIXEL: usize = 4;

/// Owned RGBA8 frame. Frames are cloned, never aliased, when handed between
/// stages so the live and offline paths cannot race on the same buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, DotvidError> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(DotvidError::Render(format!(
                "frame buffer length mismatch: {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// An empty frame has zero width or height; rendering it is a no-op.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
