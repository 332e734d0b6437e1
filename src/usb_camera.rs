use std::{fmt::Debug, fs, path::Path, time::Duration};

use tracing::{debug, info};
use v4l::{
    buffer::{Metadata, Type},
    frameinterval::FrameIntervalEnum,
    framesize::FrameSizeEnum,
    io::traits::CaptureStream,
    prelude::MmapStream,
    video::{capture::Parameters, Capture},
    Device, Format, FourCC, Fraction,
};
use zune_jpeg::JpegDecoder;

use crate::{Error, Result};

/// Anything that can expose one still frame and store it as a JPEG file.
pub trait FrameCapture {
    fn capture_to(&mut self, path: &Path) -> Result<()>;
}

pub struct Camera {
    device: Device,
    fps: u32,
    width: u32,
    height: u32,
    format: FourCC,
    warmup: usize,
}

impl Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("fps", &self.fps)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format.to_string())
            .finish()
    }
}

impl Camera {
    pub fn new_with_path(path: &str, width: u32, height: u32, fps: u32) -> Result<Self> {
        let dev = Device::with_path(path)
            .map_err(|e| Error::Camera(format!("can not open camera {path}: {e}")))?;
        Self::new_from_device(dev, width, height, fps)
    }

    pub fn new(index: usize, width: u32, height: u32, fps: u32) -> Result<Self> {
        let dev = Device::new(index)
            .map_err(|e| Error::Camera(format!("can not open camera {index}: {e}")))?;
        Self::new_from_device(dev, width, height, fps)
    }

    fn new_from_device(device: Device, width: u32, height: u32, fps: u32) -> Result<Self> {
        let mjpeg = FourCC::new(b"MJPG");
        let mut offered = vec![];
        let mut found = false;
        for frame_size in device.enum_framesizes(mjpeg)? {
            if let FrameSizeEnum::Discrete(size) = frame_size.size {
                for fi in device.enum_frameintervals(mjpeg, size.width, size.height)? {
                    if let FrameIntervalEnum::Discrete(fraction) = fi.interval {
                        offered.push(format!(
                            "{}x{}@{}",
                            size.width, size.height, fraction.denominator
                        ));
                        if size.width == width
                            && size.height == height
                            && fraction.denominator == fps
                        {
                            found = true;
                        }
                    }
                }
            }
        }
        if !found {
            return Err(Error::Camera(format!(
                "no MJPEG mode {width}x{height}@{fps}, camera offers [{}]",
                offered.join(", ")
            )));
        }

        let real_format = device.set_format(&Format::new(width, height, mjpeg))?;
        let real_params = device.set_params(&Parameters::new(Fraction::new(1, fps)))?;
        let cam = Camera {
            device,
            fps: real_params.interval.denominator,
            format: real_format.fourcc,
            width: real_format.width,
            height: real_format.height,
            warmup: 2,
        };
        info!("camera ready {cam:?}");
        Ok(cam)
    }

    /// Frames thrown away after a still stream starts, so the kept frame is
    /// exposed after the caller changed the illumination.
    pub fn with_warmup(mut self, frames: usize) -> Self {
        self.warmup = frames;
        self
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Continuous capture stream, used by the live preview.
    pub fn stream(&self) -> Result<MmapStream<'_>> {
        Ok(MmapStream::with_buffers(&self.device, Type::VideoCapture, 4)?)
    }

    /// Grab one fresh still. A new stream is opened so no stale buffered frame
    /// is returned.
    pub fn capture_mjpeg(&mut self) -> Result<(Vec<u8>, Duration)> {
        let mut stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, 2)?;
        for _ in 0..self.warmup {
            stream.next()?;
        }
        let (raw_mjpeg, meta) = stream.next()?;
        let jpeg = frame_bytes(raw_mjpeg, meta).to_vec();
        Ok((jpeg, frame_time(meta)))
    }
}

impl FrameCapture for Camera {
    fn capture_to(&mut self, path: &Path) -> Result<()> {
        let (jpeg, time_stamp) = self.capture_mjpeg()?;
        let (w, h) = validate_jpeg(&jpeg)?;
        fs::write(path, &jpeg)?;
        debug!(
            "wrote {w}x{h} frame ({} bytes, sensor time {time_stamp:?}) to {}",
            jpeg.len(),
            path.display()
        );
        Ok(())
    }
}

/// Payload of a dequeued buffer. Drivers may hand out the whole mapping.
pub(crate) fn frame_bytes<'b>(buf: &'b [u8], meta: &Metadata) -> &'b [u8] {
    let used = meta.bytesused as usize;
    if used > 0 && used <= buf.len() {
        &buf[..used]
    } else {
        buf
    }
}

fn frame_time(meta: &Metadata) -> Duration {
    Duration::new(meta.timestamp.sec as u64, (meta.timestamp.usec * 1000) as u32)
}

/// Check a buffer really is a JPEG, returning its dimensions.
pub fn validate_jpeg(data: &[u8]) -> Result<(usize, usize)> {
    let mut decoder = JpegDecoder::new(data);
    decoder.decode_headers()?;
    decoder
        .dimensions()
        .ok_or_else(|| Error::Camera("jpeg without dimensions".into()))
}
