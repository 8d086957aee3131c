//! Caller supplied input window plus the pending copy of codestream bytes that
//! could not be consumed before the decoder asked for more input.

#[derive(Debug, Default)]
pub struct InputBuffer<'a> {
    next_in: &'a [u8],
    input_set: bool,
    closed: bool,
    /// Absolute offset of `next_in[0]` in the file.
    file_pos: u64,
    /// End of the current codestream box contents, `None` when unbounded.
    codestream_end: Option<u64>,
    codestream_copy: Vec<u8>,
    /// Bytes at the end of `codestream_copy` not yet advanced past in `next_in`.
    codestream_unconsumed: usize,
    /// Position in `codestream_copy` already processed. May exceed its length
    /// when the decoder skips data that was not provided yet.
    codestream_pos: usize,
    pub codestream_bits_ahead: usize,
}

impl<'a> InputBuffer<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.input_set
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn set(&mut self, data: &'a [u8]) {
        self.next_in = data;
        self.input_set = true;
    }

    /// Forgets the caller window and returns how many bytes were unconsumed.
    pub fn release(&mut self) -> usize {
        let remaining = self.next_in.len();
        self.next_in = &[];
        self.input_set = false;
        remaining
    }

    pub fn avail_in(&self) -> usize {
        self.next_in.len()
    }

    pub fn next_in(&self) -> &'a [u8] {
        self.next_in
    }

    pub fn file_pos(&self) -> u64 {
        self.file_pos
    }

    pub fn advance(&mut self, size: usize) {
        debug_assert!(size <= self.next_in.len());
        let size = size.min(self.next_in.len());
        self.next_in = &self.next_in[size..];
        self.file_pos += size as u64;
    }

    pub fn set_codestream_end(&mut self, end: Option<u64>) {
        self.codestream_end = end;
    }

    pub fn available_codestream(&self) -> usize {
        match self.codestream_end {
            None => self.next_in.len(),
            Some(end) => {
                let in_box = end.saturating_sub(self.file_pos);
                usize::try_from(in_box)
                    .unwrap_or(usize::MAX)
                    .min(self.next_in.len())
            }
        }
    }

    pub fn has_pending_copy(&self) -> bool {
        !self.codestream_copy.is_empty()
    }

    /// Marks `size` codestream bytes as consumed. `size` may exceed what is
    /// available, the excess is skipped from input supplied later.
    pub fn advance_codestream(&mut self, size: usize) {
        let avail_codestream = self.available_codestream();
        if self.codestream_copy.is_empty() {
            if size <= avail_codestream {
                self.advance(size);
            } else {
                self.codestream_pos = size - avail_codestream;
                self.advance(avail_codestream);
            }
        } else {
            self.codestream_pos = self.codestream_pos.saturating_add(size);
            let copied = self.codestream_copy.len();
            if self.codestream_pos.saturating_add(self.codestream_unconsumed) >= copied {
                let advance = self
                    .codestream_unconsumed
                    .min(self.codestream_unconsumed + self.codestream_pos - copied);
                self.advance(advance);
                self.codestream_pos -= self.codestream_pos.min(copied);
                self.codestream_unconsumed = 0;
                self.codestream_copy.clear();
            }
        }
    }

    /// Moves whatever codestream bytes are left in the caller window into the
    /// pending copy, so the window can be released.
    pub fn request_more(&mut self) {
        if self.codestream_copy.is_empty() {
            let avail_codestream = self.available_codestream();
            self.codestream_copy
                .extend_from_slice(&self.next_in[..avail_codestream]);
            self.advance(avail_codestream);
        } else {
            self.advance(self.codestream_unconsumed);
            self.codestream_unconsumed = 0;
        }
    }

    /// Contiguous codestream bytes to parse from. Returns `None` after moving
    /// the remaining bytes aside when nothing usable is available.
    pub fn codestream(&mut self) -> Option<&[u8]> {
        if self.codestream_copy.is_empty() && self.codestream_pos > 0 {
            let skip = self.codestream_pos.min(self.available_codestream());
            self.advance(skip);
            self.codestream_pos -= skip;
            if self.codestream_pos > 0 {
                self.request_more();
                return None;
            }
        }
        let avail_codestream = self.available_codestream();
        if self.codestream_copy.is_empty() {
            if avail_codestream == 0 {
                self.request_more();
                return None;
            }
            return Some(&self.next_in[..avail_codestream]);
        }
        self.codestream_copy
            .extend_from_slice(&self.next_in[self.codestream_unconsumed..avail_codestream]);
        self.codestream_unconsumed = avail_codestream;
        Some(&self.codestream_copy[self.codestream_pos..])
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_buffer_survives_release() {
        let first = [1u8, 2, 3];
        let second = [4u8, 5];
        let mut input = InputBuffer::new();
        input.set(&first);
        assert_eq!(input.codestream(), Some(&first[..]));
        input.advance_codestream(1);
        input.request_more();
        assert_eq!(input.release(), 0);
        assert!(input.has_pending_copy());

        input.set(&second);
        assert_eq!(input.codestream(), Some(&[2u8, 3, 4, 5][..]));
        input.advance_codestream(4);
        assert!(!input.has_pending_copy());
        assert_eq!(input.avail_in(), 0);
        assert_eq!(input.file_pos(), 5);
    }

    #[test]
    fn test_skip_beyond_available_input() {
        let first = [0u8; 4];
        let second = [0u8, 0, 7, 8];
        let mut input = InputBuffer::new();
        input.set(&first);
        input.advance_codestream(6);
        assert_eq!(input.codestream(), None);
        input.release();
        input.set(&second);
        assert_eq!(input.codestream(), Some(&[7u8, 8][..]));
    }

    #[test]
    fn test_bounded_by_box_end() {
        let data = [9u8; 10];
        let mut input = InputBuffer::new();
        input.set(&data);
        input.set_codestream_end(Some(4));
        assert_eq!(input.available_codestream(), 4);
        input.advance_codestream(4);
        assert_eq!(input.codestream(), None);
        assert_eq!(input.avail_in(), 6);
    }
}
