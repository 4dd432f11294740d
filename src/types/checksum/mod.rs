#![forbid(unsafe_code)]

/// CRC32 over a page image, salted with its position in the column file so
/// a transposed image fails verification.
pub fn image_crc32(page_index: u64, image: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_index.to_be_bytes());
    hasher.update(&(image.len() as u64).to_be_bytes());
    hasher.update(image);
    hasher.finalize()
}
