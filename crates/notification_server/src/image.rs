//! Decoding of raw `image-data` hints into image files that presentation layers can load by path.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use zbus::zvariant::Value;

use crate::record::NotificationId;

#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("image-data hint is not a (iiibiiay) structure")]
    Malformed,
    #[error("unsupported image format: {bits_per_sample} bits per sample, {channels} channels")]
    Unsupported { bits_per_sample: i32, channels: i32 },
    #[error("image-data holds {actual} bytes but {width}x{height} with rowstride {rowstride} needs {expected}")]
    Truncated { width: i32, height: i32, rowstride: i32, expected: usize, actual: usize },
    #[error("while writing image file {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Raw pixel data as transported in the `image-data` hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: i32,
    pub height: i32,
    pub rowstride: i32,
    pub has_alpha: bool,
    pub bits_per_sample: i32,
    pub channels: i32,
    pub data: Vec<u8>,
}

impl RawImage {
    pub fn from_value(value: &Value<'_>) -> Result<RawImage, ImageError> {
        let structure = match value {
            Value::Value(inner) => return RawImage::from_value(inner),
            Value::Structure(structure) => structure,
            _ => return Err(ImageError::Malformed),
        };
        match structure.fields() {
            [Value::I32(width), Value::I32(height), Value::I32(rowstride), Value::Bool(has_alpha), Value::I32(bits_per_sample), Value::I32(channels), Value::Array(data)] =>
            {
                let data: Option<Vec<u8>> = data
                    .get()
                    .iter()
                    .map(|v| match v {
                        Value::U8(b) => Some(*b),
                        _ => None,
                    })
                    .collect();
                Ok(RawImage {
                    width: *width,
                    height: *height,
                    rowstride: *rowstride,
                    has_alpha: *has_alpha,
                    bits_per_sample: *bits_per_sample,
                    channels: *channels,
                    data: data.ok_or(ImageError::Malformed)?,
                })
            }
            _ => Err(ImageError::Malformed),
        }
    }

    fn validate(&self) -> Result<(), ImageError> {
        let expected_channels = if self.has_alpha { 4 } else { 3 };
        if self.bits_per_sample != 8 || self.channels != expected_channels {
            return Err(ImageError::Unsupported { bits_per_sample: self.bits_per_sample, channels: self.channels });
        }
        if self.width <= 0 || self.height <= 0 {
            return Err(ImageError::Malformed);
        }
        let row_len = self.row_len().ok_or(ImageError::Malformed)?;
        let rowstride = usize::try_from(self.rowstride).map_err(|_| ImageError::Malformed)?;
        if rowstride < row_len {
            return Err(ImageError::Malformed);
        }
        let expected = rowstride
            .checked_mul(self.height as usize - 1)
            .and_then(|padded| padded.checked_add(row_len))
            .ok_or(ImageError::Malformed)?;
        if self.data.len() < expected {
            return Err(ImageError::Truncated {
                width: self.width,
                height: self.height,
                rowstride: self.rowstride,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Bytes per row without padding, or `None` if the dimensions don't fit.
    fn row_len(&self) -> Option<usize> {
        usize::try_from(self.width).ok()?.checked_mul(usize::try_from(self.channels).ok()?)
    }

    /// Encode as a PAM (portable arbitrary map) image, dropping any row padding.
    pub fn to_pam(&self) -> Result<Vec<u8>, ImageError> {
        self.validate()?;
        let tuple_type = if self.has_alpha { "RGB_ALPHA" } else { "RGB" };
        let row_len = self.row_len().ok_or(ImageError::Malformed)?;
        let mut out = format!(
            "P7\nWIDTH {}\nHEIGHT {}\nDEPTH {}\nMAXVAL 255\nTUPLTYPE {}\nENDHDR\n",
            self.width, self.height, self.channels, tuple_type
        )
        .into_bytes();
        out.reserve(row_len * self.height as usize);
        for row in 0..self.height as usize {
            let start = row * self.rowstride as usize;
            out.extend_from_slice(&self.data[start..start + row_len]);
        }
        Ok(out)
    }

    /// Write the image for the given notification into `dir`, returning the path of the written file.
    pub fn store(&self, dir: &Path, id: NotificationId) -> Result<PathBuf, ImageError> {
        let encoded = self.to_pam()?;
        let path = dir.join(file_name(id));
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(dir)?;
            let mut file = std::fs::File::create(&path)?;
            file.write_all(&encoded)
        };
        write().map_err(|source| ImageError::Write { path: path.clone(), source })?;
        Ok(path)
    }
}

/// Name of the file [`RawImage::store`] writes for notification `id`.
pub fn file_name(id: NotificationId) -> String {
    format!("notification-{}.pam", id)
}
