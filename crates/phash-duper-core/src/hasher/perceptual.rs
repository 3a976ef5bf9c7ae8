use crate::error::Error;
use crate::phash::PerceptualHash;
use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHashes {
    pub phash: PerceptualHash,
    /// blake3 of the decoded RGBA pixels and dimensions. Equal for pixel-identical images
    /// regardless of container format or metadata.
    pub pixel_hash: [u8; 32],
}

pub fn hash_image_file(path: &Path) -> Result<ImageHashes, Error> {
    let img = image::ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(ImageHashes {
        phash: perceptual_hash_of(&img),
        pixel_hash: pixel_hash_of(&img),
    })
}

/// 64-bit gradient hash.
pub fn perceptual_hash_of(img: &DynamicImage) -> PerceptualHash {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(8, 8)
        .to_hasher();
    let hash = hasher.hash_image(img);
    let mut bytes = [0u8; 8];
    for (dst, src) in bytes.iter_mut().zip(hash.as_bytes()) {
        *dst = *src;
    }
    PerceptualHash::from_be_bytes(bytes)
}

pub fn pixel_hash_of(img: &DynamicImage) -> [u8; 32] {
    let rgba = img.to_rgba8();
    let mut hasher = blake3::Hasher::new();
    hasher.update(&rgba.width().to_le_bytes());
    hasher.update(&rgba.height().to_le_bytes());
    hasher.update(rgba.as_raw());
    *hasher.finalize().as_bytes()
}
