use crate::error::PixelError;

/// Channel layout of a [`RawImage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channels {
    /// Grayscale or binary mask
    Gray,
    /// Interleaved blue, green, red (also used for HSV triples)
    Bgr,
}

impl Channels {
    pub fn count(self) -> u8 {
        match self {
            Channels::Gray => 1,
            Channels::Bgr => 3,
        }
    }

    pub fn from_count(count: u8) -> Result<Self, PixelError> {
        match count {
            1 => Ok(Channels::Gray),
            3 => Ok(Channels::Bgr),
            other => Err(PixelError::UnsupportedChannels(other)),
        }
    }
}

/// In-memory raster with interleaved 8-bit samples.
///
/// The buffer length always equals `width * height * channels`; the
/// constructors enforce it so downstream operations can index freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: Channels,
}

impl RawImage {
    /// Create an image from an existing buffer, validating its length
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: Channels) -> Result<Self, PixelError> {
        let expected = width as usize * height as usize * channels.count() as usize;
        if data.len() != expected {
            return Err(PixelError::BufferLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    pub fn gray(data: Vec<u8>, width: u32, height: u32) -> Result<Self, PixelError> {
        Self::new(data, width, height, Channels::Gray)
    }

    pub fn bgr(data: Vec<u8>, width: u32, height: u32) -> Result<Self, PixelError> {
        Self::new(data, width, height, Channels::Bgr)
    }

    /// All-zero image of the given shape
    pub fn zeros(width: u32, height: u32, channels: Channels) -> Self {
        let len = width as usize * height as usize * channels.count() as usize;
        Self {
            data: vec![0; len],
            width,
            height,
            channels,
        }
    }

    /// Build a grayscale image from a per-pixel function
    pub fn gray_from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            data,
            width,
            height,
            channels: Channels::Gray,
        }
    }

    /// Build a BGR image from a per-pixel function returning `[b, g, r]`
    pub fn bgr_from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self {
            data,
            width,
            height,
            channels: Channels::Bgr,
        }
    }

    /// Internal constructor for buffers whose length is correct by construction
    pub(crate) fn from_parts(data: Vec<u8>, width: u32, height: u32, channels: Channels) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * channels.count() as usize
        );
        Self {
            data,
            width,
            height,
            channels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> Channels {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Sample at `(x, y)` for channel `c`
    pub fn get(&self, x: u32, y: u32, c: usize) -> u8 {
        let n = self.channels.count() as usize;
        self.data[(y as usize * self.width as usize + x as usize) * n + c]
    }

    /// `[b, g, r]` at `(x, y)` of a 3-channel image
    pub fn bgr_at(&self, x: u32, y: u32) -> [u8; 3] {
        let off = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[off], self.data[off + 1], self.data[off + 2]]
    }

    /// True when every sample is either 0 or 255
    pub fn is_binary(&self) -> bool {
        self.data.iter().all(|&v| v == 0 || v == 255)
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|&&v| v > 0).count()
    }
}
