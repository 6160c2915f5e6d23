use async_trait::async_trait;

use crate::error::StorageResult;
use crate::traits::ObjectReader;

/// Reader over an object that has already been fetched into memory.
#[derive(Debug, Clone)]
pub struct BufferedReader {
    data: Vec<u8>,
    pos: usize,
}

impl BufferedReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

#[async_trait]
impl ObjectReader for BufferedReader {
    async fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_short_buffers() {
        let mut reader = BufferedReader::new(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);
        assert_eq!(reader.read(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], 5);
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
        assert_eq!(reader.size(), 5);
    }
}
