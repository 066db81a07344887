//! Byte layout of slotted data pages.
//!
//! Record bytes grow forward from the header; the slot array grows
//! backward from the end of the page. Free space is the contiguous gap
//! between the two, and only shrinks: tombstoned slots keep both their
//! slot entry and their data bytes until a rewrite of the whole page.

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::PageId;

/// Header bytes at the start of every data page
pub const HEADER_SIZE: usize = 20;

/// Bytes per slot-array entry
pub const SLOT_SIZE: usize = 8;

/// On-page encoding of "no linked page"
const NO_PAGE: u32 = u32::MAX;

/// Encode an optional page link into its 4-byte on-page form
pub fn write_page_link(buf: &mut [u8], link: Option<PageId>) {
    LittleEndian::write_u32(buf, link.unwrap_or(NO_PAGE));
}

/// Decode a 4-byte page link; the all-ones pattern means no link
pub fn read_page_link(buf: &[u8]) -> Option<PageId> {
    match LittleEndian::read_u32(buf) {
        NO_PAGE => None,
        page_id => Some(page_id),
    }
}

/// One slot-array entry: where a record's bytes live within the page.
/// A zero length marks a tombstoned slot.
#[derive(Debug, Clone, Copy)]
pub struct Slot {
    pub offset: u32,
    pub length: u32,
}

impl Slot {
    pub fn is_tombstone(&self) -> bool {
        self.length == 0
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.offset);
        LittleEndian::write_u32(&mut buf[4..8], self.length);
    }

    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            offset: LittleEndian::read_u32(&buf[0..4]),
            length: LittleEndian::read_u32(&buf[4..8]),
        }
    }
}
