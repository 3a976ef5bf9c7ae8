use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, BufReader, Read};
use std::path::Path;
use twox_hash::XxHash64;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// XxHash64 of the whole file, streamed.
pub fn content_hash(path: &Path) -> io::Result<u64> {
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, File::open(path)?);
    let mut hasher = XxHash64::with_seed(0);
    let mut buffer = vec![0; READ_BUFFER_SIZE];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.write(&buffer[..read]);
    }
    Ok(hasher.finish())
}

pub fn hash_data(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_streamed_hash_matches_in_memory_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        File::create(&path).unwrap().write_all(&data).unwrap();
        assert_eq!(content_hash(&path).unwrap(), hash_data(&data));
    }
}
