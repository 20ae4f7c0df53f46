use anyhow::Result;
use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig, ImageHash};

/// Perceptual hash of a chart image, base64 encoded for storage.
pub fn compute_fingerprint(img: &DynamicImage) -> String {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::DoubleGradient)
        .hash_size(8, 8)
        .to_hasher();

    hasher.hash_image(img).to_base64()
}

pub fn fingerprint_file(path: &std::path::Path) -> Result<String> {
    let img = image::open(path)?;
    Ok(compute_fingerprint(&img))
}

/// Hamming distance between two stored fingerprints; `u32::MAX` if either is
/// not a valid hash.
pub fn fingerprint_distance(lhs: &str, rhs: &str) -> u32 {
    let Ok(h1) = ImageHash::<Vec<u8>>::from_base64(lhs) else {
        return u32::MAX;
    };
    let Ok(h2) = ImageHash::<Vec<u8>>::from_base64(rhs) else {
        return u32::MAX;
    };
    h1.dist(&h2)
}
