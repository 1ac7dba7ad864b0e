/*
    LinkBuffer - bounded cursor over a byte region

    Every wire structure the router signs or frames by hand (router contact
    signing payloads, extend records, routing messages) goes through this type.

    Rules:
    - a buffer has a base, a cursor and a declared size; it never looks past
      the declared size even if the backing storage is longer
    - writes return false and reads return None on overrun, the cursor is left
      where it was
    - integers are big endian
    - nothing assumes NUL termination
*/

/// Bounded read/write cursor over `B`.
///
/// Reads are available for any `B: AsRef<[u8]>`, writes additionally need
/// `B: AsMut<[u8]>`.
#[derive(Debug, Clone)]
pub struct LinkBuffer<B> {
    base: B,
    cur: usize,
    size: usize,
}

impl LinkBuffer<Vec<u8>> {
    /// Zero-filled owned buffer of `size` bytes, ready for writing.
    pub fn with_capacity(size: usize) -> Self {
        Self {
            base: vec![0u8; size],
            cur: 0,
            size,
        }
    }

    /// Consume the buffer, keeping only the bytes written so far.
    pub fn into_used(mut self) -> Vec<u8> {
        self.base.truncate(self.cur);
        self.base
    }
}

impl<B: AsRef<[u8]>> LinkBuffer<B> {
    /// Wrap the whole of `base`.
    pub fn new(base: B) -> Self {
        let size = base.as_ref().len();
        Self { base, cur: 0, size }
    }

    /// Wrap the first `size` bytes of `base`. Fails if `base` is shorter.
    pub fn with_size(base: B, size: usize) -> Option<Self> {
        if size > base.as_ref().len() {
            return None;
        }
        Some(Self { base, cur: 0, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn position(&self) -> usize {
        self.cur
    }

    pub fn size_left(&self) -> usize {
        self.size - self.cur
    }

    pub fn is_exhausted(&self) -> bool {
        self.cur == self.size
    }

    pub fn rewind(&mut self) {
        self.cur = 0;
    }

    /// Move the cursor to an absolute offset inside the region.
    pub fn seek(&mut self, pos: usize) -> bool {
        if pos > self.size {
            return false;
        }
        self.cur = pos;
        true
    }

    fn region(&self) -> &[u8] {
        &self.base.as_ref()[..self.size]
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        if self.size_left() < N {
            return None;
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.region()[self.cur..self.cur + N]);
        self.cur += N;
        Some(out)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|b| b[0])
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.take::<2>().map(u16::from_be_bytes)
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.take::<4>().map(u32::from_be_bytes)
    }

    pub fn read_u64(&mut self) -> Option<u64> {
        self.take::<8>().map(u64::from_be_bytes)
    }

    /// Fill `out` completely or leave the cursor untouched.
    pub fn read_into(&mut self, out: &mut [u8]) -> bool {
        if self.size_left() < out.len() {
            return false;
        }
        let start = self.cur;
        out.copy_from_slice(&self.region()[start..start + out.len()]);
        self.cur += out.len();
        true
    }

    /// Fixed-size array read.
    pub fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take::<N>()
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn read_bytes(&mut self, len: usize) -> Option<&[u8]> {
        if self.size_left() < len {
            return None;
        }
        let start = self.cur;
        self.cur += len;
        Some(&self.base.as_ref()[start..start + len])
    }

    /// Copy bytes up to (not including) `delim` into `out`.
    ///
    /// Stops early when `out` is full. The delimiter is consumed when found.
    /// Returns the number of bytes copied.
    pub fn read_until(&mut self, delim: u8, out: &mut [u8]) -> usize {
        let mut copied = 0;
        while self.cur < self.size && copied < out.len() {
            let byte = self.region()[self.cur];
            self.cur += 1;
            if byte == delim {
                return copied;
            }
            out[copied] = byte;
            copied += 1;
        }
        if self.cur < self.size && self.region()[self.cur] == delim {
            self.cur += 1;
        }
        copied
    }

    /// Owned copy of the whole declared region.
    pub fn copy(&self) -> Vec<u8> {
        self.region().to_vec()
    }

    /// Owned copy of everything before the cursor.
    pub fn copy_used(&self) -> Vec<u8> {
        self.region()[..self.cur].to_vec()
    }

    /// Borrowed read-only view of the whole declared region.
    pub fn view(&self) -> &[u8] {
        self.region()
    }

    /// Borrowed view of the unread remainder.
    pub fn remaining(&self) -> &[u8] {
        &self.region()[self.cur..]
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> LinkBuffer<B> {
    pub fn write(&mut self, data: &[u8]) -> bool {
        if self.size_left() < data.len() {
            return false;
        }
        let start = self.cur;
        self.base.as_mut()[start..start + data.len()].copy_from_slice(data);
        self.cur += data.len();
        true
    }

    pub fn put_u8(&mut self, v: u8) -> bool {
        self.write(&[v])
    }

    pub fn put_u16(&mut self, v: u16) -> bool {
        self.write(&v.to_be_bytes())
    }

    pub fn put_u32(&mut self, v: u32) -> bool {
        self.write(&v.to_be_bytes())
    }

    pub fn put_u64(&mut self, v: u64) -> bool {
        self.write(&v.to_be_bytes())
    }

    /// u32 length prefix followed by the bytes.
    pub fn put_len_prefixed(&mut self, data: &[u8]) -> bool {
        let Ok(len) = u32::try_from(data.len()) else {
            return false;
        };
        if self.size_left() < 4 + data.len() {
            return false;
        }
        self.put_u32(len) && self.write(data)
    }
}
