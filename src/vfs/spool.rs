//! 回退缓存读取器（cache-on-backward-seek）
//!
//! 压缩解码流只支持顺序读取。顺序读取时数据边流过边写入临时
//! 后备文件；第一次乱序 seek 之后，读取全部改由后备文件提供，
//! 底层解码器不再回退。

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// 顺序拉取解码器时一次搬运的缓冲大小
const SPOOL_COPY_BUF: usize = 64 * 1024;

/// 包装一个只进解码流，使其获得 `Seek` 能力
///
/// # 行为
///
/// - 顺序读取：从内部解码器拉取，同时追加写入后备文件
/// - 向后 seek：直接定位到后备文件中已缓存的位置
/// - 向前 seek：把解码器推进到目标位置（中间数据照常入缓存）
/// - `SeekFrom::End`: 需要先完整解码一次以获知总长
pub struct SpoolingReader<R: Read> {
    inner: Option<R>,
    spool: File,
    /// 已写入后备文件的解码字节数
    spooled: u64,
    /// 当前逻辑读取位置
    pos: u64,
}

impl<R: Read> SpoolingReader<R> {
    pub fn new(inner: R) -> io::Result<Self> {
        Ok(Self {
            inner: Some(inner),
            spool: tempfile::tempfile()?,
            spooled: 0,
            pos: 0,
        })
    }

    /// 把解码器推进到至少 `target` 字节（或 EOF）
    fn fill_to(&mut self, target: u64) -> io::Result<()> {
        let mut buf = [0u8; SPOOL_COPY_BUF];
        while self.spooled < target {
            let Some(inner) = self.inner.as_mut() else {
                break; // 解码器已耗尽
            };
            let want = ((target - self.spooled) as usize).min(buf.len());
            let n = inner.read(&mut buf[..want])?;
            if n == 0 {
                self.inner = None;
                break;
            }
            self.spool.seek(SeekFrom::Start(self.spooled))?;
            self.spool.write_all(&buf[..n])?;
            self.spooled += n as u64;
        }
        Ok(())
    }

    /// 完整耗尽解码器（`SeekFrom::End` 需要）
    fn fill_all(&mut self) -> io::Result<()> {
        self.fill_to(u64::MAX)
    }
}

impl<R: Read> Read for SpoolingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        // 位置落在缓存之外时先补齐
        if self.pos + 1 > self.spooled {
            self.fill_to(self.pos + buf.len() as u64)?;
        }

        if self.pos >= self.spooled {
            return Ok(0); // EOF
        }

        let available = (self.spooled - self.pos).min(buf.len() as u64) as usize;
        self.spool.seek(SeekFrom::Start(self.pos))?;
        let n = self.spool.read(&mut buf[..available])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read> Seek for SpoolingReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p,
            SeekFrom::Current(delta) => {
                let base = self.pos as i64;
                let t = base.checked_add(delta).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "seek overflow")
                })?;
                if t < 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "seek before start",
                    ));
                }
                t as u64
            }
            SeekFrom::End(delta) => {
                self.fill_all()?;
                let t = self.spooled as i64 + delta;
                if t < 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "seek before start",
                    ));
                }
                t as u64
            }
        };

        // 向前越过缓存边界时推进解码器；向后 seek 由缓存直接命中
        if target > self.spooled {
            self.fill_to(target)?;
        }
        self.pos = target;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_read_passthrough() {
        let data: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let mut reader = SpoolingReader::new(&data[..]).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_random_data_survives_seek_storm() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let data: Vec<u8> = (0..200_000).map(|_| rng.gen()).collect();
        let mut reader = SpoolingReader::new(&data[..]).unwrap();

        // 乱序窗口读取，每个窗口都要与原始数据一致
        for _ in 0..32 {
            let start = rng.gen_range(0..data.len() - 64);
            reader.seek(SeekFrom::Start(start as u64)).unwrap();
            let mut window = [0u8; 64];
            reader.read_exact(&mut window).unwrap();
            assert_eq!(&window[..], &data[start..start + 64]);
        }
    }

    #[test]
    fn test_backward_seek_served_from_cache() {
        let data = b"abcdefghij".to_vec();
        let mut reader = SpoolingReader::new(&data[..]).unwrap();

        let mut first = [0u8; 6];
        reader.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"abcdef");

        reader.seek(SeekFrom::Start(2)).unwrap();
        let mut again = [0u8; 3];
        reader.read_exact(&mut again).unwrap();
        assert_eq!(&again, b"cde");
    }

    #[test]
    fn test_forward_seek_fills_gap() {
        let data = b"0123456789".to_vec();
        let mut reader = SpoolingReader::new(&data[..]).unwrap();

        reader.seek(SeekFrom::Start(7)).unwrap();
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, b"789");

        // 中间跳过的数据也在缓存里
        reader.seek(SeekFrom::Start(0)).unwrap();
        let mut all = Vec::new();
        reader.read_to_end(&mut all).unwrap();
        assert_eq!(all, data);
    }

    #[test]
    fn test_seek_from_end_drains_decoder() {
        let data = b"hello world".to_vec();
        let mut reader = SpoolingReader::new(&data[..]).unwrap();
        let end = reader.seek(SeekFrom::End(0)).unwrap();
        assert_eq!(end, data.len() as u64);

        reader.seek(SeekFrom::End(-5)).unwrap();
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, b"world");
    }

    #[test]
    fn test_seek_past_eof_reads_nothing() {
        let data = b"short".to_vec();
        let mut reader = SpoolingReader::new(&data[..]).unwrap();
        reader.seek(SeekFrom::Start(100)).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
