// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Nouveau-style push buffers.
//!
//! A push buffer is a sequence of method headers, each followed by its data dwords. The header
//! selects a subchannel (the class bound to it), a method offset and how the offset advances
//! between data dwords:
//!
//! | Kind   | Tag          | Method for data dword `i` |
//! |--------|--------------|---------------------------|
//! | `SQ`   | `0x20000000` | `mthd + 4 * i`            |
//! | `NINC` | `0x60000000` | `mthd`                    |
//! | `1INC` | `0xa0000000` | `mthd` then `mthd + 4`    |
//! | `IMMD` | `0x80000000` | `mthd`, data in the header |
//!
//! The count occupies bits 16..29, so one header covers at most `0x1fff` dwords. [`Push`]
//! continues longer runs with a fresh header.

use super::{hw_enum, record, PackRecord};
use smallvec::SmallVec;

/// Largest number of data dwords one header can describe.
pub const MAX_COUNT: u32 = 0x1fff;

/// Largest value that fits in an immediate header.
pub const MAX_IMMEDIATE: u32 = 0x1fff;

const SQ: u32 = 0x2000_0000;
const NINC: u32 = 0x6000_0000;
const IMMD: u32 = 0x8000_0000;
const ONE_INC: u32 = 0xa000_0000;

/// Subchannels the driver binds classes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Subchannel {
    ThreeD = 0,
    Compute = 1,
    Copy = 4,
}

/// How the method offset advances across the data of one header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    Increasing,
    NonIncreasing,
    IncreaseOnce,
    Immediate,
}

impl HeaderKind {
    const fn tag(self) -> u32 {
        match self {
            HeaderKind::Increasing => SQ,
            HeaderKind::NonIncreasing => NINC,
            HeaderKind::IncreaseOnce => ONE_INC,
            HeaderKind::Immediate => IMMD,
        }
    }
}

#[inline]
const fn header(tag: u32, count: u32, subc: Subchannel, mthd: u16) -> u32 {
    tag | (count << 16) | ((subc as u32) << 13) | ((mthd as u32) >> 2)
}

/// Header of `count` dwords written to increasing methods starting at `mthd`.
#[inline]
pub const fn sq(subc: Subchannel, mthd: u16, count: u32) -> u32 {
    header(SQ, count, subc, mthd)
}

/// Header of `count` dwords all written to `mthd`.
#[inline]
pub const fn ninc(subc: Subchannel, mthd: u16, count: u32) -> u32 {
    header(NINC, count, subc, mthd)
}

/// Header of `count` dwords written to `mthd` and then repeatedly to `mthd + 4`.
#[inline]
pub const fn one_inc(subc: Subchannel, mthd: u16, count: u32) -> u32 {
    header(ONE_INC, count, subc, mthd)
}

/// Immediate header carrying `data`, which must not exceed [`MAX_IMMEDIATE`].
#[inline]
pub const fn immd(subc: Subchannel, mthd: u16, data: u32) -> u32 {
    header(IMMD, data, subc, mthd)
}

/// Splits a header into its kind, count (or immediate data), subchannel and method.
pub fn decode(header: u32) -> Option<(HeaderKind, u32, u32, u16)> {
    let kind = match header & 0xe000_0000 {
        SQ => HeaderKind::Increasing,
        NINC => HeaderKind::NonIncreasing,
        IMMD => HeaderKind::Immediate,
        ONE_INC => HeaderKind::IncreaseOnce,
        _ => return None,
    };

    Some((
        kind,
        (header >> 16) & MAX_COUNT,
        (header >> 13) & 0x7,
        ((header & 0x1fff) << 2) as u16,
    ))
}

/// Method offsets of the classes the crate programs.
pub mod mthd {
    /// Host class, reachable on every subchannel.
    pub mod host {
        pub const SEMAPHORE_A: u16 = 0x0010;
        pub const SEMAPHORE_B: u16 = 0x0014;
        pub const SEMAPHORE_C: u16 = 0x0018;
        pub const SEMAPHORE_D: u16 = 0x001c;
    }

    /// Copy class.
    pub mod copy {
        pub const NOP: u16 = 0x0100;
    }

    /// 3D class.
    pub mod three_d {
        pub const SET_SHADER_LOCAL_MEMORY_WINDOW: u16 = 0x077c;
        pub const SET_SHADER_LOCAL_MEMORY_A: u16 = 0x0790;
        pub const SET_CLEAR_RECT_HORIZONTAL: u16 = 0x0d18;
        pub const SET_CLEAR_RECT_VERTICAL: u16 = 0x0d1c;
        pub const SET_COLOR_CLEAR_VALUE: u16 = 0x0d80;
        pub const SET_Z_CLEAR_VALUE: u16 = 0x0d90;
        pub const SET_STENCIL_CLEAR_VALUE: u16 = 0x0da0;
        pub const INVALIDATE_SAMPLER_CACHE_NO_WFI: u16 = 0x1424;
        pub const INVALIDATE_TEXTURE_HEADER_CACHE_NO_WFI: u16 = 0x1428;
        pub const SET_TEX_SAMPLER_POOL_A: u16 = 0x155c;
        pub const SET_TEX_HEADER_POOL_A: u16 = 0x1574;
        pub const SET_ZPASS_PIXEL_COUNT: u16 = 0x1558;
        pub const SET_CLEAR_SURFACE_CONTROL: u16 = 0x19bc;
        pub const CLEAR_SURFACE: u16 = 0x19e0;
        pub const SET_REPORT_SEMAPHORE_A: u16 = 0x1b00;
    }

    /// Compute class.
    pub mod compute {
        pub const SET_SHADER_SHARED_MEMORY_WINDOW: u16 = 0x0214;
        pub const SET_SHADER_SHARED_MEMORY_WINDOW_A: u16 = 0x02a0;
        pub const SET_SHADER_LOCAL_MEMORY_NON_THROTTLED_A: u16 = 0x02e4;
        pub const SET_SHADER_LOCAL_MEMORY_THROTTLED_A: u16 = 0x02f0;
        pub const SET_SHADER_LOCAL_MEMORY_WINDOW: u16 = 0x077c;
        pub const SET_SHADER_LOCAL_MEMORY_A: u16 = 0x0790;
        pub const SET_SHADER_LOCAL_MEMORY_WINDOW_A: u16 = 0x07b0;
        pub const INVALIDATE_SAMPLER_CACHE_NO_WFI: u16 = 0x1424;
        pub const INVALIDATE_TEXTURE_HEADER_CACHE_NO_WFI: u16 = 0x1428;
        pub const SET_TEX_SAMPLER_POOL_A: u16 = 0x155c;
        pub const SET_TEX_HEADER_POOL_A: u16 = 0x1574;
    }
}

/// Counters `SET_REPORT_SEMAPHORE_D` can report.
pub mod report {
    pub const NONE: u32 = 0x00;
    pub const DA_VERTICES_GENERATED: u32 = 0x01;
    pub const DA_PRIMITIVES_GENERATED: u32 = 0x03;
    pub const VS_INVOCATIONS: u32 = 0x05;
    pub const GS_INVOCATIONS: u32 = 0x07;
    pub const GS_PRIMITIVES_GENERATED: u32 = 0x09;
    pub const CLIPPER_INVOCATIONS: u32 = 0x0f;
    pub const CLIPPER_PRIMITIVES_GENERATED: u32 = 0x11;
    pub const PS_INVOCATIONS: u32 = 0x13;
    pub const ZPASS_PIXEL_CNT64: u32 = 0x15;
    pub const TI_INVOCATIONS: u32 = 0x1b;
    pub const TS_INVOCATIONS: u32 = 0x1d;
}

/// Base of the shared memory window.
pub const SHARED_WINDOW: u64 = 0xfe << 24;

/// Base of the local memory window.
pub const LOCAL_WINDOW: u64 = 0xff << 24;

hw_enum! {
    pub enum ReportOperation {
        #[default]
        Release = 0,
        Acquire = 1,
        ReportOnly = 2,
        Trap = 3,
    }

    pub enum ReportRelease {
        #[default]
        AfterAllPrecedingReadsComplete = 0,
        AfterAllPrecedingWritesComplete = 1,
    }

    pub enum PipelineLocation {
        #[default]
        None = 0,
        DataAssembler = 1,
        VertexShader = 2,
        TessellationInitShader = 8,
        TessellationShader = 9,
        GeometryShader = 6,
        Vpc = 4,
        ZCull = 3,
        PixelShader = 7,
        DepthTest = 10,
        All = 15,
    }

    pub enum StructureSize {
        #[default]
        FourWords = 0,
        OneWord = 1,
    }

    pub enum SemaphoreOperation {
        #[default]
        Acquire = 1,
        Release = 2,
        AcquireGeq = 4,
        AcquireAnd = 8,
    }

    pub enum ReleaseSize {
        #[default]
        SixteenBytes = 0,
        FourBytes = 1,
    }
}

record! {
    /// Data of `SET_CLEAR_SURFACE_CONTROL`.
    pub struct ClearSurfaceControl("SET_CLEAR_SURFACE_CONTROL", 4, 4) {
        respect_stencil_mask: bool => (0, 0, 1, Bool),
        use_clear_rect: bool => (0, 4, 1, Bool),
        use_scissor0: bool => (0, 8, 1, Bool),
        use_viewport_clip0: bool => (0, 12, 1, Bool),
    }

    /// Data of `CLEAR_SURFACE`.
    pub struct ClearSurface("CLEAR_SURFACE", 4, 4) {
        z_enable: bool => (0, 0, 1, Bool),
        stencil_enable: bool => (0, 1, 1, Bool),
        r_enable: bool => (0, 2, 1, Bool),
        g_enable: bool => (0, 3, 1, Bool),
        b_enable: bool => (0, 4, 1, Bool),
        a_enable: bool => (0, 5, 1, Bool),
        mrt_select: u32 => (0, 6, 4, Uint),
        rt_array_index: u32 => (0, 10, 16, Uint),
    }

    pub struct ClearRectHorizontal("SET_CLEAR_RECT_HORIZONTAL", 4, 4) {
        xmin: u32 => (0, 0, 16, Uint),
        xmax: u32 => (0, 16, 16, Uint),
    }

    pub struct ClearRectVertical("SET_CLEAR_RECT_VERTICAL", 4, 4) {
        ymin: u32 => (0, 0, 16, Uint),
        ymax: u32 => (0, 16, 16, Uint),
    }

    /// Data of `SET_REPORT_SEMAPHORE_D`.
    pub struct ReportSemaphoreD("SET_REPORT_SEMAPHORE_D", 4, 4) {
        operation: ReportOperation => (0, 0, 2, Uint),
        release: ReportRelease => (0, 4, 1, Uint),
        pipeline_location: PipelineLocation => (0, 12, 4, Uint),
        report: u32 => (0, 23, 5, Uint),
        structure_size: StructureSize => (0, 28, 1, Uint),
    }

    /// Data of the host class `SEMAPHORE_D`.
    pub struct SemaphoreD("SEMAPHORED", 4, 4) {
        operation: SemaphoreOperation => (0, 0, 4, Uint),
        acquire_switch: bool => (0, 12, 1, Bool),
        release_wfi: bool => (0, 20, 1, Bool),
        release_size: ReleaseSize => (0, 24, 1, Uint),
    }
}

/// Returns the single dword of a 4-byte method record.
#[inline]
pub fn dword<R: PackRecord>(record: &R) -> u32 {
    debug_assert_eq!(R::LEN, 4);
    let mut bytes = [0u8; 4];
    record.pack(&mut bytes);

    u32::from_le_bytes(bytes)
}

/// Data of `INVALIDATE_*_CACHE_NO_WFI` invalidating every line.
pub const INVALIDATE_ALL_LINES: u32 = 0;

/// A push buffer under construction.
///
/// Data dwords written with [`data`](Self::data) belong to the most recent method header, whose
/// count is bumped in place.
#[derive(Clone, Debug, Default)]
pub struct Push {
    dwords: SmallVec<[u32; 64]>,
    open: Option<OpenHeader>,
}

#[derive(Clone, Copy, Debug)]
struct OpenHeader {
    at: usize,
    kind: HeaderKind,
    subc: Subchannel,
    mthd: u16,
}

impl Push {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a run of data to increasing methods.
    pub fn mthd(&mut self, subc: Subchannel, mthd: u16) -> &mut Self {
        self.open_header(HeaderKind::Increasing, subc, mthd)
    }

    /// Starts a run of data all written to the same method.
    pub fn ninc(&mut self, subc: Subchannel, mthd: u16) -> &mut Self {
        self.open_header(HeaderKind::NonIncreasing, subc, mthd)
    }

    /// Starts a run whose first dword goes to `mthd` and the rest to `mthd + 4`.
    pub fn one_inc(&mut self, subc: Subchannel, mthd: u16) -> &mut Self {
        self.open_header(HeaderKind::IncreaseOnce, subc, mthd)
    }

    fn open_header(&mut self, kind: HeaderKind, subc: Subchannel, mthd: u16) -> &mut Self {
        self.open = Some(OpenHeader {
            at: self.dwords.len(),
            kind,
            subc,
            mthd,
        });
        self.dwords.push(header(kind.tag(), 0, subc, mthd));

        self
    }

    /// Appends one data dword to the open header.
    ///
    /// # Panics
    ///
    /// - Panics if no method header is open.
    pub fn data(&mut self, value: u32) -> &mut Self {
        let Some(open) = self.open else {
            panic!("data dword pushed without a method header");
        };

        let count = (self.dwords[open.at] >> 16) & MAX_COUNT;

        if count == MAX_COUNT {
            let next = match open.kind {
                HeaderKind::Increasing => open.mthd + (MAX_COUNT as u16) * 4,
                HeaderKind::IncreaseOnce => open.mthd + 4,
                _ => open.mthd,
            };
            let kind = match open.kind {
                HeaderKind::IncreaseOnce => HeaderKind::NonIncreasing,
                kind => kind,
            };
            self.open_header(kind, open.subc, next);

            return self.data(value);
        }

        self.dwords[open.at] += 1 << 16;
        self.dwords.push(value);

        self
    }

    /// Appends a 4-byte method record to the open header.
    #[inline]
    pub fn record<R: PackRecord>(&mut self, record: &R) -> &mut Self {
        self.data(dword(record))
    }

    /// Appends an immediate method, falling back to a one-dword `SQ` run when `value` does not
    /// fit in the header.
    pub fn immd(&mut self, subc: Subchannel, mthd: u16, value: u32) -> &mut Self {
        if value <= MAX_IMMEDIATE {
            self.open = None;
            self.dwords.push(immd(subc, mthd, value));
        } else {
            self.mthd(subc, mthd).data(value);
            self.open = None;
        }

        self
    }

    /// Appends an immediate method whose value is a 4-byte record.
    #[inline]
    pub fn immd_record<R: PackRecord>(&mut self, subc: Subchannel, mthd: u16, record: &R) -> &mut Self {
        self.immd(subc, mthd, dword(record))
    }

    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.dwords
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.dwords.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dwords.is_empty()
    }

    pub fn clear(&mut self) {
        self.dwords.clear();
        self.open = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encodings() {
        assert_eq!(
            sq(Subchannel::ThreeD, mthd::three_d::SET_REPORT_SEMAPHORE_A, 4),
            0x2004_06c0
        );
        assert_eq!(ninc(Subchannel::Compute, 0x0010, 3), 0x6003_2004);
        assert_eq!(one_inc(Subchannel::Copy, 0x0100, 2), 0xa002_8040);
        assert_eq!(immd(Subchannel::Copy, mthd::copy::NOP, 0), 0x8000_8040);

        assert_eq!(
            decode(0x2004_06c0),
            Some((HeaderKind::Increasing, 4, 0, 0x1b00))
        );
        assert_eq!(decode(0x4000_0000), None);
    }

    #[test]
    fn data_bumps_open_header() {
        let mut push = Push::new();
        push.mthd(Subchannel::ThreeD, mthd::three_d::SET_COLOR_CLEAR_VALUE)
            .data(1)
            .data(2)
            .data(3)
            .data(4);

        assert_eq!(push.as_slice(), &[sq(Subchannel::ThreeD, 0x0d80, 4), 1, 2, 3, 4]);
    }

    #[test]
    fn large_immediate_falls_back() {
        let mut push = Push::new();
        push.immd(Subchannel::ThreeD, mthd::three_d::SET_STENCIL_CLEAR_VALUE, 0xff)
            .immd(Subchannel::ThreeD, mthd::three_d::CLEAR_SURFACE, 0x2000);

        assert_eq!(
            push.as_slice(),
            &[
                immd(Subchannel::ThreeD, 0x0da0, 0xff),
                sq(Subchannel::ThreeD, 0x19e0, 1),
                0x2000,
            ]
        );
    }

    #[test]
    fn long_runs_continue_in_new_header() {
        let mut push = Push::new();
        push.mthd(Subchannel::Compute, 0x1000);

        for i in 0..MAX_COUNT + 2 {
            push.data(i);
        }

        let second = 1 + MAX_COUNT as usize;
        assert_eq!(push.as_slice()[0], sq(Subchannel::Compute, 0x1000, MAX_COUNT));
        assert_eq!(
            push.as_slice()[second],
            sq(Subchannel::Compute, 0x1000 + 4 * MAX_COUNT as u16, 2)
        );
        assert_eq!(push.len(), MAX_COUNT as usize + 4);
    }

    #[test]
    fn data_after_immediate_panics() {
        let mut push = Push::new();
        push.immd(Subchannel::Copy, mthd::copy::NOP, 0);

        assert_should_panic!("without a method header", {
            push.data(1);
        });
    }

    #[test]
    fn method_records() {
        let control = ClearSurfaceControl {
            use_clear_rect: true,
            ..Default::default()
        };
        assert_eq!(dword(&control), 0x10);

        let clear = ClearSurface {
            z_enable: true,
            stencil_enable: true,
            r_enable: true,
            g_enable: true,
            b_enable: true,
            a_enable: true,
            mrt_select: 1,
            rt_array_index: 2,
        };
        assert_eq!(dword(&clear), 0x3f | (1 << 6) | (2 << 10));

        let release = ReportSemaphoreD {
            operation: ReportOperation::Release,
            release: ReportRelease::AfterAllPrecedingWritesComplete,
            pipeline_location: PipelineLocation::All,
            structure_size: StructureSize::OneWord,
            ..Default::default()
        };
        assert_eq!(dword(&release), 0x1000_f010);

        let acquire = SemaphoreD {
            operation: SemaphoreOperation::Acquire,
            acquire_switch: true,
            release_size: ReleaseSize::FourBytes,
            ..Default::default()
        };
        assert_eq!(dword(&acquire), 0x0100_1001);
    }
}
