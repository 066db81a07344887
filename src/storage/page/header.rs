use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, PAGE_SIZE};
use crate::storage::page::layout::{read_page_link, write_page_link, HEADER_SIZE};

// Field offsets within the header region
const FREE_SPACE_OFFSET_AT: usize = 0;
const FREE_SPACE_SIZE_AT: usize = 4;
const RECORD_COUNT_AT: usize = 8;
const NEXT_LINK_AT: usize = 12;
const PREV_LINK_AT: usize = 16;

/// Decoded header of a slotted data page. `free_space_size` tracks the
/// contiguous gap between the record area and the slot array; deletes do
/// not grow it.
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub free_space_offset: u32,
    pub free_space_size: u32,
    pub record_count: u32,
    pub next_page_id: Option<PageId>,
    pub prev_page_id: Option<PageId>,
}

impl Default for PageHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl PageHeader {
    pub fn new() -> Self {
        Self {
            free_space_offset: HEADER_SIZE as u32,
            free_space_size: (PAGE_SIZE - HEADER_SIZE) as u32,
            record_count: 0,
            next_page_id: None,
            prev_page_id: None,
        }
    }

    /// Serialize into the header region of the page's data
    pub fn write_to(&self, page_data: &mut [u8]) {
        let header = &mut page_data[..HEADER_SIZE];
        LittleEndian::write_u32(&mut header[FREE_SPACE_OFFSET_AT..], self.free_space_offset);
        LittleEndian::write_u32(&mut header[FREE_SPACE_SIZE_AT..], self.free_space_size);
        LittleEndian::write_u32(&mut header[RECORD_COUNT_AT..], self.record_count);
        write_page_link(&mut header[NEXT_LINK_AT..], self.next_page_id);
        write_page_link(&mut header[PREV_LINK_AT..], self.prev_page_id);
    }

    /// Deserialize from the header region of the page's data
    pub fn read_from(page_data: &[u8]) -> Self {
        let header = &page_data[..HEADER_SIZE];
        Self {
            free_space_offset: LittleEndian::read_u32(&header[FREE_SPACE_OFFSET_AT..]),
            free_space_size: LittleEndian::read_u32(&header[FREE_SPACE_SIZE_AT..]),
            record_count: LittleEndian::read_u32(&header[RECORD_COUNT_AT..]),
            next_page_id: read_page_link(&header[NEXT_LINK_AT..]),
            prev_page_id: read_page_link(&header[PREV_LINK_AT..]),
        }
    }
}
