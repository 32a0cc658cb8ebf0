//! Page-addressable view over the sequential [`RingChannel`].
//!
//! Two page buffers: `current` holds page `N`, `previous` holds `N - 1`.
//! Advancing to `N + 1` swaps the buffers and refills the stale one in
//! place. Any request outside `N - 1 ..= N + 1` is a protocol violation.

use embedded_hal::delay::DelayNs;
use log::{debug, error};

use crate::app::ports::Clock;
use crate::error::{Error, Result};

use super::ReadAt;
use super::ring::RingChannel;

/// Sleep between polls of an empty channel.
const POLL_MS: u32 = 5;

struct Page {
    data: Box<[u8]>,
    len: usize,
}

impl Page {
    fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
            len: 0,
        }
    }

    fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

pub struct PageCache<'r, C, D> {
    ring: &'r RingChannel,
    clock: C,
    delay: D,
    page_size: u32,
    timeout_ms: u32,
    current: Page,
    previous: Page,
    /// Index of the page in `current`; `None` before the first request.
    current_idx: Option<u32>,
    pages_loaded: u32,
    received: u32,
}

impl<'r, C: Clock, D: DelayNs> PageCache<'r, C, D> {
    pub fn new(ring: &'r RingChannel, page_size: u32, timeout_ms: u32, clock: C, delay: D) -> Self {
        Self {
            ring,
            clock,
            delay,
            page_size,
            timeout_ms,
            current: Page::new(page_size as usize),
            previous: Page::new(page_size as usize),
            current_idx: None,
            pages_loaded: 0,
            received: 0,
        }
    }

    /// Bytes of page `index`; shorter than a page only at end of stream.
    pub fn read_page(&mut self, index: u32) -> Result<&[u8]> {
        let Some(cur) = self.current_idx else {
            if index != 0 {
                error!("OTA: first page request was {}", index);
                return Err(Error::ProtocolViolation {
                    requested: index,
                    current: 0,
                });
            }
            self.load_current()?;
            self.current_idx = Some(0);
            return Ok(self.current.bytes());
        };

        if index == cur {
            Ok(self.current.bytes())
        } else if cur.checked_sub(1) == Some(index) {
            Ok(self.previous.bytes())
        } else if cur.checked_add(1) == Some(index) {
            core::mem::swap(&mut self.current, &mut self.previous);
            self.load_current()?;
            self.current_idx = Some(index);
            Ok(self.current.bytes())
        } else {
            error!("OTA: cache miss, page {} requested on page {}", index, cur);
            Err(Error::ProtocolViolation {
                requested: index,
                current: cur,
            })
        }
    }

    /// Pull one page from the channel into `current`.
    ///
    /// Stops early when the channel is closed and drained; fails if no byte
    /// arrives within the timeout.
    fn load_current(&mut self) -> Result<()> {
        let page = &mut self.current;
        page.len = 0;
        let mut last_progress = self.clock.now_ms();

        while page.len < page.data.len() {
            // Sample before reading so bytes pushed right before close are seen.
            let closed = self.ring.is_closed();
            let n = self.ring.read(&mut page.data[page.len..]);
            if n > 0 {
                page.len += n;
                last_progress = self.clock.now_ms();
                continue;
            }
            if closed {
                break;
            }
            self.delay.delay_ms(POLL_MS);
            if self.clock.now_ms().wrapping_sub(last_progress) > self.timeout_ms {
                error!("OTA: receive timeout while loading page");
                return Err(Error::Timeout("page fill"));
            }
        }

        self.pages_loaded += 1;
        self.received += page.len as u32;
        debug!("OTA: page loaded ({} bytes)", page.len);
        Ok(())
    }

    pub fn current_page(&self) -> Option<u32> {
        self.current_idx
    }

    pub fn pages_loaded(&self) -> u32 {
        self.pages_loaded
    }

    /// Bytes pulled off the channel so far.
    pub fn bytes_received(&self) -> u32 {
        self.received
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }
}

impl<C: Clock, D: DelayNs> ReadAt for PageCache<'_, C, D> {
    /// Reads never cross a page boundary; the caller issues the next read.
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize> {
        let index = offset / self.page_size;
        let within = (offset % self.page_size) as usize;
        let page = self.read_page(index)?;
        let available = page.len().saturating_sub(within);
        let n = buf.len().min(available);
        buf[..n].copy_from_slice(&page[within..within + n]);
        Ok(n)
    }
}
