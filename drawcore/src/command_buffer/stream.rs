// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The dword stream a command buffer records into.
//!
//! A stream is a chain of GART-mapped BOs. Dwords are appended at a cursor; when the current BO
//! cannot hold the next packet, the open range is closed into a [`PushRange`] and recording
//! continues at the start of the next BO of the chain. Every BO of the chain is referenced
//! read-write, so the submission keeps the whole chain resident.
//!
//! Packets never straddle two BOs.

use crate::{
    memory::{
        refs::{BoReference, BoRefSet},
        Bo, BoAccess, BoFlags, BoService, DeviceAlignment, PushRange,
    },
    pack::{
        nv::{mthd, Push, Subchannel},
        to_dwords, PackRecord,
    },
    DeviceSize, VulkanError,
};
use std::sync::Arc;

const STREAM_ALIGNMENT: DeviceAlignment = unsafe { DeviceAlignment::new_unchecked(4096) };

/// A growable chain of BOs holding recorded dwords.
#[derive(Debug)]
pub struct CommandStream {
    service: Arc<dyn BoService>,
    size_dw: u32,
    bos: Vec<Arc<Bo>>,
    current: usize,
    start_dw: u32,
    cursor_dw: u32,
    pushes: Vec<PushRange>,
    refs: BoRefSet,
}

impl CommandStream {
    /// Creates an empty stream whose BOs hold `size_dw` dwords each.
    ///
    /// No memory is allocated until the first dword is emitted.
    pub fn new(service: Arc<dyn BoService>, size_dw: u32) -> Self {
        CommandStream {
            service,
            size_dw: size_dw.max(16),
            bos: Vec::new(),
            current: 0,
            start_dw: 0,
            cursor_dw: 0,
            pushes: Vec::new(),
            refs: BoRefSet::new(),
        }
    }

    /// Starts recording: emits the leading no-op on the copy subchannel.
    pub fn begin(&mut self) -> Result<(), VulkanError> {
        let mut push = Push::new();
        push.immd(Subchannel::Copy, mthd::copy::NOP, 0);

        self.emit_push(&push)
    }

    /// Appends `dwords` as one unit.
    pub fn emit(&mut self, dwords: &[u32]) -> Result<(), VulkanError> {
        if dwords.is_empty() {
            return Ok(());
        }

        let count = u32::try_from(dwords.len()).map_err(|_| VulkanError::OutOfHostMemory)?;
        self.ensure_space(count)?;

        let bo = &self.bos[self.current];
        let bytes: Vec<u8> = dwords.iter().flat_map(|dw| dw.to_le_bytes()).collect();

        // SAFETY: `ensure_space` made room for `count` dwords at the cursor, and stream BOs are
        // always mapped.
        unsafe { bo.write(DeviceSize::from(self.cursor_dw) * 4, &bytes) };

        self.cursor_dw += count;

        Ok(())
    }

    /// Packs `record` and appends it.
    #[inline]
    pub fn emit_record<R: PackRecord>(&mut self, record: &R) -> Result<(), VulkanError> {
        self.emit(&to_dwords(record))
    }

    /// Appends a method push buffer.
    #[inline]
    pub fn emit_push(&mut self, push: &Push) -> Result<(), VulkanError> {
        self.emit(push.as_slice())
    }

    /// References a BO the recorded commands access.
    #[inline]
    pub fn ref_bo(&mut self, bo: &Arc<Bo>, access: BoAccess) {
        self.refs.add(bo, access);
    }

    /// Returns the references collected so far, including the stream's own BOs.
    #[inline]
    pub fn refs(&self) -> &[BoReference] {
        self.refs.as_slice()
    }

    #[inline]
    pub fn num_refs(&self) -> usize {
        self.refs.len()
    }

    /// Returns the access class `bo` is referenced with.
    #[inline]
    pub fn ref_of(&self, bo: &Bo) -> Option<BoAccess> {
        self.refs.get(bo)
    }

    /// Closes the open range. Recording may continue afterwards in a new range.
    pub fn finish(&mut self) {
        self.close_range();
    }

    /// Returns the closed ranges, in execution order.
    #[inline]
    pub fn pushes(&self) -> &[PushRange] {
        &self.pushes
    }

    /// Returns the BOs of the chain.
    #[inline]
    pub fn bos(&self) -> &[Arc<Bo>] {
        &self.bos
    }

    /// Returns whether nothing has been emitted since the last reset.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pushes.is_empty() && self.cursor_dw == self.start_dw
    }

    /// Reads back every dword of the closed ranges and the open one, in order.
    pub fn dwords(&self) -> Vec<u32> {
        let mut out = Vec::new();
        let open = (self.cursor_dw > self.start_dw).then(|| (self.current, self.start_dw, self.cursor_dw - self.start_dw));

        let ranges = self
            .pushes
            .iter()
            .map(|push| {
                let index = self
                    .bos
                    .iter()
                    .position(|bo| bo.handle() == push.bo)
                    .unwrap_or(0);

                (index, push.start_dw, push.dw_count)
            })
            .chain(open);

        for (index, start_dw, count) in ranges {
            let mut bytes = vec![0u8; count as usize * 4];

            // SAFETY: the range was written by `emit` and lies inside the mapped BO.
            unsafe { self.bos[index].read(DeviceSize::from(start_dw) * 4, &mut bytes) };

            out.extend(
                bytes
                    .chunks_exact(4)
                    .map(|dw| u32::from_le_bytes([dw[0], dw[1], dw[2], dw[3]])),
            );
        }

        out
    }

    /// Rewinds the stream to the start of its first BO and drops every reference.
    ///
    /// The first BO is kept for reuse; the rest of the chain is released.
    pub fn reset(&mut self) {
        self.bos.truncate(1);
        self.current = 0;
        self.start_dw = 0;
        self.cursor_dw = 0;
        self.pushes.clear();
        self.refs.clear();

        if let Some(bo) = self.bos.first() {
            self.refs.add(bo, BoAccess::RW);
        }
    }

    fn close_range(&mut self) {
        if self.cursor_dw > self.start_dw {
            self.pushes.push(PushRange {
                bo: self.bos[self.current].handle(),
                start_dw: self.start_dw,
                dw_count: self.cursor_dw - self.start_dw,
            });
        }

        self.start_dw = self.cursor_dw;
    }

    fn capacity_dw(&self) -> u32 {
        self.bos
            .get(self.current)
            .map_or(0, |bo| u32::try_from(bo.size() / 4).unwrap_or(u32::MAX))
    }

    fn ensure_space(&mut self, count: u32) -> Result<(), VulkanError> {
        if !self.bos.is_empty() && self.cursor_dw + count <= self.capacity_dw() {
            return Ok(());
        }

        self.close_range();

        let size_dw = self.size_dw.max(count);
        let bo = Bo::new(
            &self.service,
            DeviceSize::from(size_dw) * 4,
            STREAM_ALIGNMENT,
            BoFlags::GART | BoFlags::MAPPED | BoFlags::COHERENT,
        )?;

        if !self.bos.is_empty() {
            log::trace!(
                "command stream chained to BO {} after {} ranges",
                bo.handle(),
                self.pushes.len(),
            );
        }

        self.refs.add(&bo, BoAccess::RW);
        self.bos.push(bo);
        self.current = self.bos.len() - 1;
        self.start_dw = 0;
        self.cursor_dw = 0;

        Ok(())
    }
}
