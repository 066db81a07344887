use crate::common::types::{Page, PageId, SlotId, PAGE_SIZE};
use crate::storage::page::error::PageError;
use crate::storage::page::header::PageHeader;
use crate::storage::page::layout::{Slot, SLOT_SIZE};

/// Slotted record page operations.
///
/// The slot array grows from the end of the page; record data grows from
/// the beginning (after the header). Pages of one table form a doubly
/// linked chain through the header's next/prev links.
pub struct PageManager;

impl Default for PageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PageManager {
    pub fn new() -> Self {
        Self
    }

    pub fn init_page(&self, page: &mut Page) {
        PageHeader::new().write_to(&mut page.data);
    }

    /// Insert a record and return its slot index within the page
    pub fn insert_record(&self, page: &mut Page, data: &[u8]) -> Result<SlotId, PageError> {
        let mut header = self.get_header(page);

        // Record size plus the slot entry for the record
        let record_size = data.len() as u32;
        let total_space_needed = record_size + SLOT_SIZE as u32;

        if header.free_space_size < total_space_needed {
            return Err(PageError::InsufficientSpace);
        }

        let slot_pos = Self::slot_position(header.record_count);
        let slot = Slot {
            offset: header.free_space_offset,
            length: record_size,
        };

        let data_end = header.free_space_offset as usize + data.len();
        page.data[header.free_space_offset as usize..data_end].copy_from_slice(data);
        slot.write_to(&mut page.data[slot_pos..slot_pos + SLOT_SIZE]);

        header.free_space_offset += record_size;
        header.free_space_size -= total_space_needed;
        header.record_count += 1;
        header.write_to(&mut page.data);

        Ok(header.record_count - 1)
    }

    pub fn get_record(&self, page: &Page, slot_id: SlotId) -> Result<Vec<u8>, PageError> {
        let header = self.get_header(page);

        if slot_id >= header.record_count {
            return Err(PageError::InvalidRecordId);
        }

        let slot = self.read_slot(page, slot_id);
        if slot.is_tombstone() {
            return Err(PageError::RecordNotFound);
        }

        let start = slot.offset as usize;
        let end = start + slot.length as usize;
        Ok(page.data[start..end].to_vec())
    }

    /// Delete a record by tombstoning its slot (length 0). The slot entry
    /// and the record's bytes stay where they are, so no free space is
    /// credited back; reclaiming it would need a full page rewrite.
    pub fn delete_record(&self, page: &mut Page, slot_id: SlotId) -> Result<(), PageError> {
        let header = self.get_header(page);

        if slot_id >= header.record_count {
            return Err(PageError::InvalidRecordId);
        }

        let mut slot = self.read_slot(page, slot_id);
        if slot.is_tombstone() {
            return Err(PageError::RecordNotFound);
        }

        slot.length = 0;
        let slot_pos = Self::slot_position(slot_id);
        slot.write_to(&mut page.data[slot_pos..slot_pos + SLOT_SIZE]);

        Ok(())
    }

    /// Overwrite a record in place. The new payload must not be longer than
    /// the existing record.
    pub fn update_record(&self, page: &mut Page, slot_id: SlotId, data: &[u8]) -> Result<(), PageError> {
        let header = self.get_header(page);

        if slot_id >= header.record_count {
            return Err(PageError::InvalidRecordId);
        }

        let slot = self.read_slot(page, slot_id);
        if slot.is_tombstone() {
            return Err(PageError::RecordNotFound);
        }
        if data.len() as u32 > slot.length {
            return Err(PageError::InsufficientSpace);
        }

        let start = slot.offset as usize;
        page.data[start..start + data.len()].copy_from_slice(data);

        if (data.len() as u32) < slot.length {
            let shrunk = Slot {
                offset: slot.offset,
                length: data.len() as u32,
            };
            let slot_pos = Self::slot_position(slot_id);
            shrunk.write_to(&mut page.data[slot_pos..slot_pos + SLOT_SIZE]);
        }

        Ok(())
    }

    /// Next page in the table's chain, if any
    pub fn next_page_id(&self, page: &Page) -> Option<PageId> {
        self.get_header(page).next_page_id
    }

    /// Previous page in the table's chain, if any
    pub fn prev_page_id(&self, page: &Page) -> Option<PageId> {
        self.get_header(page).prev_page_id
    }

    pub fn set_next_page_id(&self, page: &mut Page, next: Option<PageId>) {
        let mut header = self.get_header(page);
        header.next_page_id = next;
        header.write_to(&mut page.data);
    }

    pub fn set_prev_page_id(&self, page: &mut Page, prev: Option<PageId>) {
        let mut header = self.get_header(page);
        header.prev_page_id = prev;
        header.write_to(&mut page.data);
    }

    pub fn get_header(&self, page: &Page) -> PageHeader {
        PageHeader::read_from(&page.data)
    }

    pub fn record_count(&self, page: &Page) -> u32 {
        self.get_header(page).record_count
    }

    pub fn free_space(&self, page: &Page) -> u32 {
        self.get_header(page).free_space_size
    }

    fn slot_position(slot_id: SlotId) -> usize {
        PAGE_SIZE - SLOT_SIZE * (slot_id as usize + 1)
    }

    fn read_slot(&self, page: &Page, slot_id: SlotId) -> Slot {
        let slot_pos = Self::slot_position(slot_id);
        Slot::read_from(&page.data[slot_pos..slot_pos + SLOT_SIZE])
    }
}
