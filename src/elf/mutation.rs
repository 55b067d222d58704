//! Layout-rewriting operations: add/remove/extend for sections and
//! segments, program-header-table relocation, and the shift propagator
//! that keeps every cross-reference consistent while the file moves.
//!
//! Every public operation here either completes with the invariants
//! restored or fails before any shift is applied.

use tracing::{debug, warn};

use crate::elf::binary::Binary;
use crate::elf::data_handler::{Node, NodeKind};
use crate::elf::dynamic::DynamicPayload;
use crate::elf::section::Section;
use crate::elf::segment::Segment;
use crate::elf::types::*;
use crate::error::{Error, Result};
use crate::utils::{align_up, page_size};

/// Slots reserved for future segments when the table moves (v2 strategy).
const USER_SEGMENTS: u64 = 10;

/// Hole punched after the table by the PIE strategy. Large enough for ~70
/// extra descriptors and keeps AArch64 ADRP targets page-aligned.
const PIE_SHIFT: u64 = 0x1000;

/// The v1 strategy needs at least this many spare descriptor slots to be
/// worth committing to.
const MIN_POTENTIAL_SLOTS: u64 = 2;

impl Binary {
    // Sections
    // ========

    /// Append a section at the end of the file image.
    ///
    /// Loaded sections are wrapped in a fresh `PT_LOAD` segment (which may
    /// in turn relocate the program-header table); unloaded sections only
    /// consume file space.
    pub fn add_section(
        &mut self,
        mut section: Section,
        content: &[u8],
        loaded: bool,
    ) -> Result<&Section> {
        if loaded {
            let mut segment = Segment::new(PT_LOAD);
            segment.flags = PF_R
                | if section.is_writable() { PF_W } else { 0 }
                | if section.is_executable() { PF_X } else { 0 };
            let seg_idx = self.add_segment_at(segment, content, 0)?;
            let segment = &self.segments[seg_idx];
            section.file_offset = segment.file_offset;
            section.virtual_address = segment.virtual_address;
        } else {
            let last_offset = self.last_offset_section().max(self.last_offset_segment());
            section.file_offset = last_offset;
            section.virtual_address = 0;
            self.handler.make_hole(last_offset, content.len() as u64);
            self.handler.write(last_offset, content);
            if self.header.section_headers_offset >= last_offset {
                self.header.section_headers_offset += content.len() as u64;
            }
        }
        section.size = content.len() as u64;
        if !loaded {
            // The loaded path wrote the bytes through the segment.
            debug!(name = %section.name, offset = section.file_offset, "added unloaded section");
        }
        self.handler.add(Node::new(
            section.file_offset,
            if section.is_nobits() { 0 } else { section.size },
            NodeKind::Section,
        ));
        self.sections.push(section);
        self.header.numberof_sections = self.sections.len() as u16;
        Ok(self.sections.last().unwrap())
    }

    /// Remove a section: detach it from its segments, renumber the
    /// section-header links, drop its bytes and fix the header counters.
    pub fn remove_section(&mut self, name: &str, clear: bool) -> Result<()> {
        let idx = self.section_index(name)?;
        let removed = self.sections[idx].clone();

        if clear {
            self.handler.clear(removed.file_offset, removed.size);
        }

        // sh_link fields index the section table: entries above the
        // removed index slide down, entries pointing at it are dropped.
        for section in &mut self.sections {
            if section.link as usize == idx {
                section.link = 0;
            } else if section.link as usize > idx {
                section.link -= 1;
            }
        }

        let node_size = if removed.is_nobits() { 0 } else { removed.size };
        self.handler
            .remove(removed.file_offset, node_size, NodeKind::Section);

        self.sections.remove(idx);
        self.header.numberof_sections = self.sections.len() as u16;
        if (idx as u16) < self.header.section_name_table_idx {
            self.header.section_name_table_idx -= 1;
        }
        Ok(())
    }

    /// Grow a section by `size` zero bytes, shifting everything behind it.
    pub fn extend_section(&mut self, name: &str, size: u64) -> Result<()> {
        let idx = self.section_index(name)?;
        let section = &self.sections[idx];

        let from_offset = section.file_offset + section.size;
        let from_address = section.virtual_address + section.size;
        let loaded = section.virtual_address != 0;

        self.handler.make_hole(from_offset, size);

        self.shift_sections(from_offset, size);
        self.shift_segments(from_offset, size);

        // The segment that carries the growth point gets bigger instead of
        // moving.
        for segment in &mut self.segments {
            if segment.file_end() >= from_offset && from_offset >= segment.file_offset {
                if loaded {
                    segment.virtual_size += size;
                }
                segment.physical_size += size;
            }
        }

        self.sections[idx].size += size;
        self.header.section_headers_offset += size;

        if loaded {
            self.shift_dynamic_entries(from_address, size);
            self.shift_symbols(from_address, size);
            self.shift_relocations(from_address, size);
            self.fix_got_entries(from_address, size);
            if self.header.entrypoint >= from_address {
                self.header.entrypoint += size;
            }
        }
        Ok(())
    }

    // Segments
    // ========

    /// Add a segment, placing it at the page-aligned end of the file.
    /// `base` of 0 means "next free virtual address".
    pub fn add_segment(&mut self, segment: Segment, content: &[u8], base: u64) -> Result<&Segment> {
        let idx = self.add_segment_at(segment, content, base)?;
        Ok(&self.segments[idx])
    }

    fn add_segment_at(&mut self, mut segment: Segment, content: &[u8], base: u64) -> Result<usize> {
        match self.header.file_type {
            FileType::Executable | FileType::SharedObject => {}
            other => {
                return Err(Error::NotImplemented(format!(
                    "adding a segment to a {other:?} file"
                )))
            }
        }

        let base = if base == 0 {
            self.next_virtual_address()
        } else {
            base
        };

        // The descriptor table must have a spare slot before anything else
        // moves.
        if self.phdr_reloc.free_slots == 0 {
            self.relocate_phdr_table()?;
        }
        self.phdr_reloc.free_slots -= 1;

        let psize = page_size();
        let last_offset = self.last_offset_section().max(self.last_offset_segment());
        let offset = align_up(last_offset, psize);
        let size = align_up(content.len() as u64, psize);

        segment.file_offset = offset;
        if segment.virtual_address == 0 {
            segment.virtual_address = base + offset;
        }
        segment.physical_address = segment.virtual_address;
        segment.physical_size = size;
        segment.virtual_size = size;
        if segment.alignment == 0 {
            segment.alignment = psize;
        }

        self.handler.add(Node::new(offset, size, NodeKind::Segment));
        self.handler.make_hole(offset, size);
        self.handler.write(offset, content);

        if self.header.section_headers_offset >= offset {
            self.header.section_headers_offset += size;
        }

        // Keep descriptors of one type adjacent: insert after the last
        // segment of the same type when there is one.
        let at = self
            .segments
            .iter()
            .rposition(|s| s.segment_type == segment.segment_type)
            .map(|p| p + 1)
            .unwrap_or(self.segments.len());
        self.segments.insert(at, segment);
        self.header.numberof_segments = self.segments.len() as u16;
        Ok(at)
    }

    /// Grow a `PT_LOAD` / `PT_PHDR` segment in place.
    pub fn extend_segment(&mut self, index: usize, size: u64) -> Result<()> {
        let segment = self
            .segments
            .get(index)
            .ok_or_else(|| Error::not_found(format!("segment #{index}")))?;
        if !matches!(segment.segment_type, PT_LOAD | PT_PHDR) {
            return Err(Error::NotImplemented(format!(
                "extending a segment of type {:#x}",
                segment.segment_type
            )));
        }

        let from_offset = segment.file_end();
        let from_address = segment.virtual_end();

        self.handler.make_hole(from_offset, size);
        self.shift_sections(from_offset, size);
        self.shift_segments(from_offset, size);

        let segment = &mut self.segments[index];
        segment.physical_size += size;
        segment.virtual_size += size;

        self.header.section_headers_offset += size;

        self.shift_dynamic_entries(from_address, size);
        self.shift_symbols(from_address, size);
        self.shift_relocations(from_address, size);
        self.fix_got_entries(from_address, size);
        if self.header.entrypoint >= from_address {
            self.header.entrypoint += size;
        }
        Ok(())
    }

    /// Swap a segment for a new one placed at the end of the file. The
    /// PT_PHDR content (if any) is zeroed, and the section-header table is
    /// re-seated after the new segment.
    pub fn replace_segment(
        &mut self,
        index: usize,
        mut segment: Segment,
        content: &[u8],
        base: u64,
    ) -> Result<&Segment> {
        let old = self
            .segments
            .get(index)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("segment #{index}")))?;

        let base = if base == 0 {
            self.next_virtual_address()
        } else {
            base
        };

        let psize = page_size();
        let last_offset = self.last_offset_section().max(self.last_offset_segment());
        let offset = align_up(last_offset, psize);
        let size = align_up(content.len() as u64, psize);

        segment.file_offset = offset;
        if segment.virtual_address == 0 {
            segment.virtual_address = base + offset;
        }
        segment.physical_address = segment.virtual_address;
        segment.physical_size = size;
        segment.virtual_size = size;
        if segment.alignment == 0 {
            segment.alignment = psize;
        }

        self.handler.add(Node::new(offset, size, NodeKind::Segment));
        self.handler.make_hole(offset, size);
        self.handler.write(offset, content);

        if let Some(phdr) = self
            .segments
            .iter()
            .find(|s| s.segment_type == PT_PHDR)
            .cloned()
        {
            self.handler.clear(phdr.file_offset, phdr.physical_size);
        }

        self.handler
            .remove(old.file_offset, old.physical_size, NodeKind::Segment);
        self.segments.remove(index);

        self.header.section_headers_offset = segment.file_end();
        self.segments.push(segment);
        Ok(self.segments.last().unwrap())
    }

    /// Drop a segment, returning its descriptor slot to the pool when the
    /// table has been relocated.
    pub fn remove_segment(&mut self, index: usize) -> Result<()> {
        let segment = self
            .segments
            .get(index)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("segment #{index}")))?;
        self.handler
            .remove(segment.file_offset, segment.physical_size, NodeKind::Segment);
        if self.phdr_reloc.new_offset > 0 {
            self.phdr_reloc.free_slots += 1;
        }
        self.segments.remove(index);
        self.header.numberof_segments = self.segments.len() as u16;
        Ok(())
    }

    // Program-header-table relocation
    // ===============================

    /// Make room for new program-header descriptors. Tries, in order: the
    /// PIE hole strategy, the inter-segment-gap strategy (v1), and the
    /// bss-expansion strategy (v2).
    pub fn relocate_phdr_table(&mut self) -> Result<u64> {
        if self.header.file_type == FileType::SharedObject {
            if let Some(offset) = self.relocate_phdr_table_pie() {
                return Ok(offset);
            }
            warn!("PIE phdr relocation failed, falling back");
        }

        debug!("trying the v1 phdr relocator");
        if let Some(offset) = self.relocate_phdr_table_v1() {
            return Ok(offset);
        }
        debug!("trying the v2 phdr relocator");
        if let Some(offset) = self.relocate_phdr_table_v2() {
            return Ok(offset);
        }
        Err(Error::NotSupported(
            "the program-header table of this binary cannot be relocated".to_string(),
        ))
    }

    /// PIE strategy: punch a page-sized hole right behind the existing
    /// table and let it grow into the gap. Everything after the hole
    /// shifts, in file and address space alike.
    fn relocate_phdr_table_pie(&mut self) -> Option<u64> {
        if self.phdr_reloc.new_offset > 0 {
            return Some(self.phdr_reloc.new_offset);
        }

        let phdr_offset = self.header.program_headers_offset;
        let phdr_size = self.header.class.phdr_entry_size();
        let from = phdr_offset + phdr_size * self.segments.len() as u64;
        let shift = PIE_SHIFT;

        self.phdr_reloc.new_offset = from;
        self.phdr_reloc.free_slots = shift / phdr_size - self.segments.len() as u64;

        self.handler.make_hole(from, shift);
        debug!(from, shift, "phdr hole punched (PIE)");

        self.header.section_headers_offset += shift;

        self.shift_sections(from, shift);
        self.shift_segments(from, shift);

        for segment in &mut self.segments {
            if segment.file_end() >= from && from >= segment.file_offset {
                segment.virtual_size += shift;
                segment.physical_size += shift;
            }
        }

        self.shift_dynamic_entries(from, shift);
        self.shift_symbols(from, shift);
        self.shift_relocations(from, shift);
        self.fix_got_entries(from, shift);

        if self.header.entrypoint >= from {
            self.header.entrypoint += shift;
        }
        Some(phdr_offset)
    }

    /// v1 strategy: find the pair of adjacent LOAD segments with the
    /// widest file gap, extend the earlier one across it and park the
    /// table at the start of the extension. Nothing shifts.
    fn relocate_phdr_table_v1(&mut self) -> Option<u64> {
        if self.phdr_reloc.new_offset > 0 {
            return Some(self.phdr_reloc.new_offset);
        }

        let phdr_size = self.header.class.phdr_entry_size();
        let loads: Vec<usize> = self
            .segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_load())
            .map(|(i, _)| i)
            .collect();

        let mut chosen: Option<(usize, u64)> = None;
        let mut best_slots = 0u64;
        for (pos, &idx) in loads.iter().enumerate() {
            let current = &self.segments[idx];
            if current.has_bss() {
                debug!(va = current.virtual_address, "skipping bss-like segment");
                continue;
            }
            if pos + 1 >= loads.len() {
                // The last LOAD has nothing to extend into.
                return None;
            }
            let adjacent = &self.segments[loads[pos + 1]];
            let gap = adjacent.file_offset.saturating_sub(current.file_end());
            let slots = gap / phdr_size;
            debug!(gap, slots, "phdr gap candidate");
            if slots > best_slots {
                chosen = Some((idx, gap));
                best_slots = slots;
            }
        }

        let (seg_idx, delta) = chosen?;
        if best_slots < MIN_POTENTIAL_SLOTS {
            debug!(slots = best_slots, "too few descriptor slots in the gap");
            return None;
        }

        let table_slots = self.segments.len() as u64;
        let free_slots = (delta / phdr_size).checked_sub(table_slots)?;
        if free_slots < table_slots {
            debug!("the gap cannot hold the descriptor table comfortably");
            return None;
        }

        let new_offset = self.segments[seg_idx].file_end();
        self.phdr_reloc.new_offset = new_offset;
        self.phdr_reloc.free_slots = free_slots;
        self.header.program_headers_offset = new_offset;

        let base =
            self.segments[seg_idx].virtual_address - self.segments[seg_idx].file_offset;
        self.segments[seg_idx].physical_size += delta;
        self.segments[seg_idx].virtual_size += delta;

        if let Some(phdr) = self.segments.iter_mut().find(|s| s.segment_type == PT_PHDR) {
            phdr.file_offset = new_offset;
            phdr.virtual_address = base + new_offset;
            phdr.physical_address = phdr.virtual_address;
            let (off, sz) = (phdr.file_offset, phdr.physical_size);
            self.handler.clear(off, sz);
        }
        Some(new_offset)
    }

    /// v2 strategy: expand the unique bss-like LOAD segment to its full
    /// virtual extent, park the table right after it and wrap the table in
    /// a new read-only LOAD segment.
    fn relocate_phdr_table_v2(&mut self) -> Option<u64> {
        if self.phdr_reloc.new_offset > 0 {
            return Some(self.phdr_reloc.new_offset);
        }

        let phdr_size = self.header.class.phdr_entry_size();

        let bss_candidates: Vec<usize> = self
            .segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_load() && s.has_bss())
            .map(|(i, _)| i)
            .collect();
        if bss_candidates.len() != 1 {
            warn!(
                count = bss_candidates.len(),
                "v2 needs exactly one bss-like LOAD segment"
            );
            return None;
        }
        let bss_idx = bss_candidates[0];

        let bss = &self.segments[bss_idx];
        let original_psize = bss.physical_size;
        let delta = bss.virtual_size - bss.physical_size;
        let new_offset = bss.file_offset + bss.virtual_size;
        let hole_at = bss.file_end();

        self.phdr_reloc.new_offset = new_offset;
        self.phdr_reloc.free_slots = USER_SEGMENTS;
        self.header.program_headers_offset = new_offset;

        // The mapped-but-absent tail must exist (as zeros) in the file now.
        let nb_segments = self.segments.len() as u64 + 1 + USER_SEGMENTS;
        self.handler.make_hole(hole_at, delta);
        self.segments[bss_idx].physical_size = self.segments[bss_idx].virtual_size;

        let table_size = nb_segments * phdr_size;
        let imagebase = self.imagebase();
        let mut wrapper = Segment::new(PT_LOAD);
        wrapper.flags = PF_R;
        wrapper.alignment = 0x1000;
        wrapper.file_offset = new_offset;
        wrapper.virtual_address = imagebase + new_offset;
        wrapper.physical_address = wrapper.virtual_address;
        wrapper.physical_size = table_size;
        wrapper.virtual_size = table_size;

        self.handler
            .add(Node::new(new_offset, table_size, NodeKind::Segment));

        let at = self
            .segments
            .iter()
            .rposition(|s| s.is_load())
            .map(|p| p + 1)
            .unwrap_or(self.segments.len());
        self.segments.insert(at, wrapper);
        self.header.numberof_segments = self.segments.len() as u16;

        if let Some(phdr) = self.segments.iter_mut().find(|s| s.segment_type == PT_PHDR) {
            phdr.file_offset = new_offset;
            phdr.virtual_address = imagebase + new_offset;
            phdr.physical_address = phdr.virtual_address;
            let (off, sz) = (phdr.file_offset, phdr.physical_size);
            self.handler.clear(off, sz);
        }

        // File contents after the old bss end slide past the zero fill and
        // the new table. NOBITS sections have no file presence and stay.
        let from = self.segments[bss_idx].file_offset + original_psize;
        let shift = delta + table_size;
        self.header.section_headers_offset += shift;
        for section in &mut self.sections {
            if section.file_offset >= from && !section.is_nobits() {
                section.file_offset += shift;
                if section.virtual_address > 0 {
                    section.virtual_address += shift;
                }
            }
        }
        Some(new_offset)
    }

    // Shift propagator
    // ================

    /// Slide sections at or after `from` (file domain; mapped sections
    /// move in address space too).
    pub(crate) fn shift_sections(&mut self, from: u64, shift: u64) {
        debug!(from, shift, "shifting sections");
        for section in &mut self.sections {
            if section.file_offset >= from {
                section.file_offset += shift;
                if section.virtual_address > 0 {
                    section.virtual_address += shift;
                }
            }
        }
    }

    /// Slide segments at or after `from` in file, virtual and physical
    /// address space.
    pub(crate) fn shift_segments(&mut self, from: u64, shift: u64) {
        debug!(from, shift, "shifting segments");
        for segment in &mut self.segments {
            if segment.file_offset >= from {
                segment.file_offset += shift;
                segment.virtual_address += shift;
                segment.physical_address += shift;
            }
        }
    }

    /// Slide address-valued dynamic entries and init/fini array elements.
    /// Array elements only move when they read as a positive signed word;
    /// -1 sentinels stay.
    pub(crate) fn shift_dynamic_entries(&mut self, from: u64, shift: u64) {
        debug!(from, shift, "shifting dynamic entries");
        let class = self.header.class;
        for entry in &mut self.dynamic_entries {
            if entry.is_array() {
                if let DynamicPayload::Array(entries) = &mut entry.payload {
                    for address in entries.iter_mut() {
                        let positive = match class {
                            Class::Elf32 => (*address as u32 as i32) > 0,
                            Class::Elf64 => (*address as i64) > 0,
                        };
                        if *address >= from && positive {
                            *address += shift;
                        }
                    }
                }
                if entry.value >= from {
                    entry.value += shift;
                }
            } else if entry.holds_address() && entry.value >= from {
                entry.value += shift;
            }
        }
    }

    /// Slide symbol values at or after `from`.
    pub(crate) fn shift_symbols(&mut self, from: u64, shift: u64) {
        debug!(from, shift, "shifting symbols");
        for symbol in self
            .dynamic_symbols
            .iter_mut()
            .chain(self.static_symbols.iter_mut())
        {
            if symbol.value >= from {
                symbol.value += shift;
            }
        }
    }

    /// Slide relocation targets. Only machines with a known relocation
    /// model are patched; others are left alone with a warning.
    pub(crate) fn shift_relocations(&mut self, from: u64, shift: u64) {
        let machine = self.header.machine;
        match machine {
            EM_ARM | EM_AARCH64 | EM_X86_64 | EM_386 | EM_PPC => {
                self.patch_relocations(machine, from, shift)
            }
            other => {
                warn!(machine = other, "relocations for this machine are not handled");
            }
        }
    }

    fn patch_relocations(&mut self, machine: u16, from: u64, shift: u64) {
        debug!(machine, from, shift, "patching relocations");
        let address_addends = addend_address_types(machine);
        for reloc in &mut self.relocations {
            if reloc.address >= from {
                reloc.address += shift;
            }
            if address_addends.contains(&reloc.relocation_type) {
                if let Some(addend) = reloc.addend.as_mut() {
                    if *addend > 0 && *addend as u64 >= from {
                        *addend += shift as i64;
                    }
                }
            }
        }
    }
}
