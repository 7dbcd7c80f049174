// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Gather information about rendering, held in query pools.
//!
//! A query pool is one GART BO. Its head holds one availability word per query; the reports
//! follow at a 16-byte aligned offset. Each report is 16 bytes: a 64-bit counter value and a
//! 64-bit timestamp.
//!
//! | Query type            | Reports per query          |
//! |-----------------------|----------------------------|
//! | `Occlusion`           | 2 (begin, end)             |
//! | `Timestamp`           | 1                          |
//! | `PipelineStatistics`  | 2 per enabled statistic    |
//!
//! The GPU writes reports and availability through report semaphores recorded by the command
//! buffer; the host reads them back with [`QueryPool::get_results`].

use crate::{
    device::Device,
    macros::{impl_id_counter, vulkan_bitflags, vulkan_enum},
    memory::{align_up, Bo, BoFlags, DeviceAlignment},
    pack::nv::{
        dword, mthd, report, PipelineLocation, Push, ReleaseSize, ReportOperation, ReportRelease,
        ReportSemaphoreD, SemaphoreD, SemaphoreOperation, StructureSize, Subchannel,
    },
    DeviceOwned, DeviceSize, NonExhaustive, Validated, ValidationError, VulkanError,
};
use std::{
    num::NonZero,
    ops::Range,
    sync::Arc,
    time::{Duration, Instant},
};

/// The size of one report.
const REPORT_SIZE: DeviceSize = 16;

const REPORT_ALIGNMENT: DeviceAlignment = unsafe { DeviceAlignment::new_unchecked(16) };

const QUERY_ALIGNMENT: DeviceAlignment = unsafe { DeviceAlignment::new_unchecked(256) };

/// How long a waiting readback spins before the device is considered lost.
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// A collection of one or more queries of a particular type.
#[derive(Debug)]
pub struct QueryPool {
    device: Arc<Device>,
    id: NonZero<u64>,
    bo: Arc<Bo>,

    query_type: QueryType,
    query_count: u32,
    pipeline_statistics: QueryPipelineStatisticFlags,
    query_start: DeviceSize,
    query_stride: DeviceSize,
}

impl QueryPool {
    /// Creates a new `QueryPool`.
    pub fn new(
        device: Arc<Device>,
        create_info: QueryPoolCreateInfo,
    ) -> Result<Arc<QueryPool>, Validated<VulkanError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        Ok(Self::new_unchecked(device, create_info)?)
    }

    #[doc(hidden)]
    pub fn new_unchecked(
        device: Arc<Device>,
        create_info: QueryPoolCreateInfo,
    ) -> Result<Arc<QueryPool>, VulkanError> {
        let QueryPoolCreateInfo {
            query_type,
            query_count,
            pipeline_statistics,
            _ne: _,
        } = create_info;

        let query_start = align_up(DeviceSize::from(query_count) * 4, REPORT_ALIGNMENT);
        let reports_per_query = match query_type {
            QueryType::Occlusion => 2,
            QueryType::Timestamp => 1,
            QueryType::PipelineStatistics => 2 * DeviceSize::from(pipeline_statistics.count()),
        };
        let query_stride = reports_per_query * REPORT_SIZE;
        let size = query_start + query_stride * DeviceSize::from(query_count);

        let bo = Bo::new(
            device.service(),
            size,
            QUERY_ALIGNMENT,
            BoFlags::GART | BoFlags::MAPPED | BoFlags::COHERENT | BoFlags::NO_SHARE,
        )?;

        // SAFETY: the BO was just created and nothing else can reach it yet.
        unsafe { bo.write(0, &vec![0; size as usize]) };

        log::trace!("created {query_type:?} query pool of {query_count} queries ({size} bytes)");

        Ok(Arc::new(QueryPool {
            device,
            id: Self::next_id(),
            bo,
            query_type,
            query_count,
            pipeline_statistics,
            query_start,
            query_stride,
        }))
    }

    /// Returns the query type of the pool.
    #[inline]
    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    /// Returns the number of query slots of this query pool.
    #[inline]
    pub fn query_count(&self) -> u32 {
        self.query_count
    }

    /// Returns the pipeline statistics flags of this query pool.
    #[inline]
    pub fn pipeline_statistics(&self) -> QueryPipelineStatisticFlags {
        self.pipeline_statistics
    }

    /// Returns the BO holding availability words and reports.
    #[inline]
    pub fn bo(&self) -> &Arc<Bo> {
        &self.bo
    }

    /// Checks that `first..first + count` lies inside the pool.
    pub(crate) fn validate_range(&self, first: u32, count: u32) -> Result<(), Box<ValidationError>> {
        if first
            .checked_add(count)
            .is_none_or(|end| end > self.query_count)
            || first >= self.query_count
        {
            return Err(Box::new(ValidationError {
                problem: "the queries are not inside the query pool".into(),
                vuids: &[
                    "VUID-vkCmdResetQueryPool-firstQuery-00796",
                    "VUID-vkCmdResetQueryPool-firstQuery-00797",
                    "VUID-vkCmdBeginQuery-query-00802",
                ],
                ..Default::default()
            }));
        }

        Ok(())
    }

    fn available_offset(&self, query: u32) -> DeviceSize {
        debug_assert!(query < self.query_count);
        DeviceSize::from(query) * 4
    }

    fn report_offset(&self, query: u32) -> DeviceSize {
        debug_assert!(query < self.query_count);
        self.query_start + DeviceSize::from(query) * self.query_stride
    }

    /// Returns the number of elements one query writes with `flags`.
    pub const fn result_len(&self, flags: QueryResultFlags) -> DeviceSize {
        (match self.query_type {
            QueryType::Occlusion | QueryType::Timestamp => 1,
            QueryType::PipelineStatistics => self.pipeline_statistics.count() as DeviceSize,
        }) + flags.intersects(QueryResultFlags::WITH_AVAILABILITY) as DeviceSize
    }

    /// Resets queries from the host by clearing their availability words.
    pub fn reset(&self, range: Range<u32>) -> Result<(), Box<ValidationError>> {
        self.validate_range(range.start, range.len() as u32)?;

        let zeroes = vec![0; range.len() * 4];

        // SAFETY: the caller must not reset queries that in-flight work still writes.
        unsafe { self.bo.write(self.available_offset(range.start), &zeroes) };

        Ok(())
    }

    /// Returns whether the result of `query` has been written.
    pub fn result_available(&self, query: u32) -> bool {
        self.read_u32(self.available_offset(query)) != 0
    }

    /// Copies the results of a range of queries to `destination`.
    ///
    /// [`result_len`](Self::result_len) elements are written for each query. Returns `true` if
    /// every result was available. Unavailable results are only written with
    /// [`QueryResultFlags::PARTIAL`].
    pub fn get_results<T: QueryResultElement>(
        &self,
        range: Range<u32>,
        destination: &mut [T],
        flags: QueryResultFlags,
    ) -> Result<bool, Validated<VulkanError>> {
        self.validate_get_results(range.clone(), destination, flags)?;

        Ok(self.get_results_unchecked(range, destination, flags)?)
    }

    fn validate_get_results<T>(
        &self,
        range: Range<u32>,
        destination: &[T],
        flags: QueryResultFlags,
    ) -> Result<(), Box<ValidationError>> {
        if range.is_empty() {
            return Err(Box::new(ValidationError {
                context: "range".into(),
                problem: "is empty".into(),
                ..Default::default()
            }));
        }

        if range.end > self.query_count {
            return Err(Box::new(ValidationError {
                problem: "`range.end` is greater than `self.query_count()`".into(),
                vuids: &[
                    "VUID-vkGetQueryPoolResults-firstQuery-00813",
                    "VUID-vkGetQueryPoolResults-firstQuery-00816",
                ],
                ..Default::default()
            }));
        }

        let required_len = self.result_len(flags) * range.len() as DeviceSize;

        if (destination.len() as DeviceSize) < required_len {
            return Err(Box::new(ValidationError {
                context: "destination.len()".into(),
                problem: "is less than the number of elements required for the query type, and \
                    the provided range and flags"
                    .into(),
                vuids: &["VUID-vkGetQueryPoolResults-dataSize-00817"],
                ..Default::default()
            }));
        }

        if self.query_type == QueryType::Timestamp && flags.intersects(QueryResultFlags::PARTIAL) {
            return Err(Box::new(ValidationError {
                problem: "`self.query_type()` is `QueryType::Timestamp`, but `flags` contains \
                    `QueryResultFlags::PARTIAL`"
                    .into(),
                vuids: &["VUID-vkGetQueryPoolResults-queryType-00818"],
                ..Default::default()
            }));
        }

        Ok(())
    }

    #[doc(hidden)]
    pub fn get_results_unchecked<T: QueryResultElement>(
        &self,
        range: Range<u32>,
        destination: &mut [T],
        flags: QueryResultFlags,
    ) -> Result<bool, VulkanError> {
        self.device.check_lost()?;

        let per_query = self.result_len(flags) as usize;
        let value_count = per_query - flags.intersects(QueryResultFlags::WITH_AVAILABILITY) as usize;
        let mut all_available = true;

        for (query, dst) in range.zip(destination.chunks_exact_mut(per_query)) {
            let mut available = self.result_available(query);

            if !available && flags.intersects(QueryResultFlags::WAIT) {
                self.wait_available(query)?;
                available = true;
            }

            if available || flags.intersects(QueryResultFlags::PARTIAL) {
                let reports = self.report_offset(query);

                for (index, dst) in dst[..value_count].iter_mut().enumerate() {
                    let value = match self.query_type {
                        QueryType::Timestamp => self.read_u64(reports + 8),
                        QueryType::Occlusion | QueryType::PipelineStatistics => {
                            let begin = reports + 2 * REPORT_SIZE * index as DeviceSize;
                            self.read_u64(begin + REPORT_SIZE)
                                .wrapping_sub(self.read_u64(begin))
                        }
                    };
                    *dst = T::from_u64(value);
                }
            }

            all_available &= available;

            if flags.intersects(QueryResultFlags::WITH_AVAILABILITY) {
                dst[value_count] = T::from_u64(available as u64);
            }
        }

        Ok(all_available)
    }

    fn wait_available(&self, query: u32) -> Result<(), VulkanError> {
        let deadline = Instant::now() + QUERY_TIMEOUT;

        while Instant::now() < deadline {
            if self.result_available(query) {
                return Ok(());
            }

            self.device.check_lost()?;
            std::thread::yield_now();
        }

        self.device.mark_lost("query timeout");

        Err(VulkanError::DeviceLost)
    }

    fn read_u32(&self, offset: DeviceSize) -> u32 {
        let mut bytes = [0; 4];
        // SAFETY: the GPU only writes whole aligned words, so a torn read cannot occur.
        unsafe { self.bo.read(offset, &mut bytes) };

        u32::from_le_bytes(bytes)
    }

    fn read_u64(&self, offset: DeviceSize) -> u64 {
        let mut bytes = [0; 8];
        // SAFETY: see `read_u32`.
        unsafe { self.bo.read(offset, &mut bytes) };

        u64::from_le_bytes(bytes)
    }

    /// Builds the methods resetting `first..first + count` on the GPU.
    ///
    /// Every availability word is released to zero first; a host-semaphore acquire on each then
    /// holds back later work until the zero has landed.
    pub(crate) fn reset_push(&self, first: u32, count: u32) -> Push {
        let mut push = Push::new();

        for query in first..first + count {
            let addr = self.bo.gpu_addr() + self.available_offset(query);
            release_semaphore(&mut push, addr, 0);
        }

        for query in first..first + count {
            let addr = self.bo.gpu_addr() + self.available_offset(query);

            push.mthd(Subchannel::ThreeD, mthd::host::SEMAPHORE_A)
                .data((addr >> 32) as u32)
                .data((addr as u32) >> 2)
                .data(0)
                .record(&SemaphoreD {
                    operation: SemaphoreOperation::Acquire,
                    acquire_switch: true,
                    release_size: ReleaseSize::FourBytes,
                    ..Default::default()
                });
        }

        push
    }

    /// Builds the methods starting `query`.
    pub(crate) fn begin_push(&self, query: u32) -> Push {
        self.begin_end_push(query, false)
    }

    /// Builds the methods ending `query` and marking it available.
    pub(crate) fn end_push(&self, query: u32) -> Push {
        let mut push = self.begin_end_push(query, true);
        let addr = self.bo.gpu_addr() + self.available_offset(query);
        release_semaphore(&mut push, addr, 1);

        push
    }

    fn begin_end_push(&self, query: u32, end: bool) -> Push {
        let mut push = Push::new();
        let mut addr =
            self.bo.gpu_addr() + self.report_offset(query) + REPORT_SIZE * end as DeviceSize;

        match self.query_type {
            QueryType::Occlusion => {
                push.immd(
                    Subchannel::ThreeD,
                    mthd::three_d::SET_ZPASS_PIXEL_COUNT,
                    !end as u32,
                );
                report_semaphore(
                    &mut push,
                    addr,
                    PipelineLocation::All,
                    report::ZPASS_PIXEL_CNT64,
                );
            }
            QueryType::PipelineStatistics => {
                for &(flag, location, counter) in STATISTICS {
                    if !self.pipeline_statistics.intersects(flag) {
                        continue;
                    }

                    report_semaphore(&mut push, addr, location, counter);
                    addr += 2 * REPORT_SIZE;
                }
            }
            QueryType::Timestamp => (),
        }

        push
    }

    /// Builds the methods writing the GPU time to `query` and marking it available.
    pub(crate) fn timestamp_push(&self, query: u32) -> Push {
        let mut push = Push::new();
        let reports = self.bo.gpu_addr() + self.report_offset(query);
        report_semaphore(&mut push, reports, PipelineLocation::All, report::NONE);

        let addr = self.bo.gpu_addr() + self.available_offset(query);
        release_semaphore(&mut push, addr, 1);

        push
    }
}

impl DeviceOwned for QueryPool {
    #[inline]
    fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl_id_counter!(QueryPool);

/// Statistics in flag order, with the unit and counter that report them.
const STATISTICS: &[(QueryPipelineStatisticFlags, PipelineLocation, u32)] = &[
    (
        QueryPipelineStatisticFlags::INPUT_ASSEMBLY_VERTICES,
        PipelineLocation::DataAssembler,
        report::DA_VERTICES_GENERATED,
    ),
    (
        QueryPipelineStatisticFlags::INPUT_ASSEMBLY_PRIMITIVES,
        PipelineLocation::DataAssembler,
        report::DA_PRIMITIVES_GENERATED,
    ),
    (
        QueryPipelineStatisticFlags::VERTEX_SHADER_INVOCATIONS,
        PipelineLocation::VertexShader,
        report::VS_INVOCATIONS,
    ),
    (
        QueryPipelineStatisticFlags::GEOMETRY_SHADER_INVOCATIONS,
        PipelineLocation::GeometryShader,
        report::GS_INVOCATIONS,
    ),
    (
        QueryPipelineStatisticFlags::GEOMETRY_SHADER_PRIMITIVES,
        PipelineLocation::GeometryShader,
        report::GS_PRIMITIVES_GENERATED,
    ),
    (
        QueryPipelineStatisticFlags::CLIPPING_INVOCATIONS,
        PipelineLocation::Vpc,
        report::CLIPPER_INVOCATIONS,
    ),
    (
        QueryPipelineStatisticFlags::CLIPPING_PRIMITIVES,
        PipelineLocation::Vpc,
        report::CLIPPER_PRIMITIVES_GENERATED,
    ),
    (
        QueryPipelineStatisticFlags::FRAGMENT_SHADER_INVOCATIONS,
        PipelineLocation::PixelShader,
        report::PS_INVOCATIONS,
    ),
    (
        QueryPipelineStatisticFlags::TESSELLATION_CONTROL_SHADER_PATCHES,
        PipelineLocation::TessellationInitShader,
        report::TI_INVOCATIONS,
    ),
    (
        QueryPipelineStatisticFlags::TESSELLATION_EVALUATION_SHADER_INVOCATIONS,
        PipelineLocation::TessellationShader,
        report::TS_INVOCATIONS,
    ),
];

fn report_semaphore(push: &mut Push, addr: u64, location: PipelineLocation, counter: u32) {
    push.mthd(Subchannel::ThreeD, mthd::three_d::SET_REPORT_SEMAPHORE_A)
        .data((addr >> 32) as u32)
        .data(addr as u32)
        .data(0)
        .record(&ReportSemaphoreD {
            operation: ReportOperation::ReportOnly,
            pipeline_location: location,
            report: counter,
            structure_size: StructureSize::FourWords,
            ..Default::default()
        });
}

fn release_semaphore(push: &mut Push, addr: u64, payload: u32) {
    push.mthd(Subchannel::ThreeD, mthd::three_d::SET_REPORT_SEMAPHORE_A)
        .data((addr >> 32) as u32)
        .data(addr as u32)
        .data(payload)
        .data(dword(&ReportSemaphoreD {
            operation: ReportOperation::Release,
            release: ReportRelease::AfterAllPrecedingWritesComplete,
            pipeline_location: PipelineLocation::All,
            structure_size: StructureSize::OneWord,
            ..Default::default()
        }));
}

/// Parameters to create a new `QueryPool`.
#[derive(Clone, Debug)]
pub struct QueryPoolCreateInfo {
    /// The type of query that the pool should be for.
    ///
    /// There is no default value.
    pub query_type: QueryType,

    /// The number of queries to create in the pool.
    ///
    /// The default value is `0`, which must be overridden.
    pub query_count: u32,

    /// If `query_type` is [`QueryType::PipelineStatistics`], the statistics to query.
    ///
    /// For any other value of `query_type`, this must be empty.
    ///
    /// The default value is empty.
    pub pipeline_statistics: QueryPipelineStatisticFlags,

    pub _ne: NonExhaustive,
}

impl QueryPoolCreateInfo {
    /// Returns a `QueryPoolCreateInfo` with the specified `query_type`.
    #[inline]
    pub fn query_type(query_type: QueryType) -> Self {
        Self {
            query_type,
            query_count: 0,
            pipeline_statistics: QueryPipelineStatisticFlags::empty(),
            _ne: NonExhaustive(()),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        let &Self {
            query_type,
            query_count,
            pipeline_statistics,
            _ne: _,
        } = self;

        if query_count == 0 {
            return Err(Box::new(ValidationError {
                context: "query_count".into(),
                problem: "is 0".into(),
                vuids: &["VUID-VkQueryPoolCreateInfo-queryCount-02763"],
                ..Default::default()
            }));
        }

        if query_type == QueryType::PipelineStatistics {
            if pipeline_statistics.is_empty() {
                return Err(Box::new(ValidationError {
                    context: "pipeline_statistics".into(),
                    problem: "is empty".into(),
                    ..Default::default()
                }));
            }
        } else if !pipeline_statistics.is_empty() {
            return Err(Box::new(ValidationError {
                problem: "`query_type` is not `QueryType::PipelineStatistics`, but \
                    `pipeline_statistics` is not empty"
                    .into(),
                ..Default::default()
            }));
        }

        Ok(())
    }
}

vulkan_enum! {
    /// The type of query that a query pool should perform.
    QueryType = QueryType(i32);

    /// Tracks the number of samples that pass per-fragment tests (e.g. the depth test).
    Occlusion = OCCLUSION,

    /// Tracks statistics on pipeline invocations and their input data.
    PipelineStatistics = PIPELINE_STATISTICS,

    /// Writes timestamps at chosen points in a command buffer.
    Timestamp = TIMESTAMP,
}

vulkan_bitflags! {
    /// For `PipelineStatistics` queries, the statistics that should be gathered.
    QueryPipelineStatisticFlags = QueryPipelineStatisticFlags(u32);

    /// Count the number of vertices processed by the input assembly.
    INPUT_ASSEMBLY_VERTICES = INPUT_ASSEMBLY_VERTICES,

    /// Count the number of primitives processed by the input assembly.
    INPUT_ASSEMBLY_PRIMITIVES = INPUT_ASSEMBLY_PRIMITIVES,

    /// Count the number of times a vertex shader is invoked.
    VERTEX_SHADER_INVOCATIONS = VERTEX_SHADER_INVOCATIONS,

    /// Count the number of times a geometry shader is invoked.
    GEOMETRY_SHADER_INVOCATIONS = GEOMETRY_SHADER_INVOCATIONS,

    /// Count the number of primitives generated by geometry shaders.
    GEOMETRY_SHADER_PRIMITIVES = GEOMETRY_SHADER_PRIMITIVES,

    /// Count the number of times the clipping stage is invoked on a primitive.
    CLIPPING_INVOCATIONS = CLIPPING_INVOCATIONS,

    /// Count the number of primitives that are output by the clipping stage.
    CLIPPING_PRIMITIVES = CLIPPING_PRIMITIVES,

    /// Count the number of times a fragment shader is invoked.
    FRAGMENT_SHADER_INVOCATIONS = FRAGMENT_SHADER_INVOCATIONS,

    /// Count the number of patches processed by a tessellation control shader.
    TESSELLATION_CONTROL_SHADER_PATCHES = TESSELLATION_CONTROL_SHADER_PATCHES,

    /// Count the number of times a tessellation evaluation shader is invoked.
    TESSELLATION_EVALUATION_SHADER_INVOCATIONS = TESSELLATION_EVALUATION_SHADER_INVOCATIONS,
}

vulkan_bitflags! {
    /// Flags to control how the results of a query should be retrieved.
    QueryResultFlags = QueryResultFlags(u32);

    /// Wait for the results to become available before writing the results.
    WAIT = WAIT,

    /// Write an additional element to the end of each query's results, indicating the
    /// availability of the results.
    WITH_AVAILABILITY = WITH_AVAILABILITY,

    /// Allow writing partial results to the buffer, instead of waiting until they are fully
    /// available.
    PARTIAL = PARTIAL,
}

/// An element query results can be written as. Implemented for `u32` and `u64`.
pub trait QueryResultElement: Copy {
    /// Converts a 64-bit result, truncating if needed.
    fn from_u64(value: u64) -> Self;
}

impl QueryResultElement for u32 {
    #[inline]
    fn from_u64(value: u64) -> Self {
        value as u32
    }
}

impl QueryResultElement for u64 {
    #[inline]
    fn from_u64(value: u64) -> Self {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::{
        QueryPipelineStatisticFlags, QueryPool, QueryPoolCreateInfo, QueryResultFlags, QueryType,
    };
    use crate::{
        command_buffer::tests::recording,
        pack::nv::{self, mthd, Subchannel},
        Validated,
    };
    use std::sync::Arc;

    fn pool(device: &Arc<crate::device::Device>, query_type: QueryType, count: u32) -> Arc<QueryPool> {
        QueryPool::new(
            device.clone(),
            QueryPoolCreateInfo {
                query_count: count,
                ..QueryPoolCreateInfo::query_type(query_type)
            },
        )
        .unwrap()
    }

    #[test]
    fn query_pool_create() {
        let (device, _service) = dev!();
        let pool = pool(&device, QueryType::Occlusion, 5);

        // 5 availability words padded to 32 bytes, then 5 queries of 2 reports.
        assert_eq!(pool.bo().size(), 32 + 5 * 32);
        assert!(!pool.result_available(4));
    }

    #[test]
    fn query_pool_create_zero() {
        let (device, _service) = dev!();

        match QueryPool::new(
            device,
            QueryPoolCreateInfo::query_type(QueryType::Occlusion),
        ) {
            Err(Validated::ValidationError(err)) => {
                assert_eq!(err.context, "create_info.query_count");
            }
            _ => panic!(),
        }
    }

    #[test]
    fn statistics_stride() {
        let (device, _service) = dev!();
        let pool = QueryPool::new(
            device,
            QueryPoolCreateInfo {
                query_count: 2,
                pipeline_statistics: QueryPipelineStatisticFlags::VERTEX_SHADER_INVOCATIONS
                    | QueryPipelineStatisticFlags::FRAGMENT_SHADER_INVOCATIONS
                    | QueryPipelineStatisticFlags::CLIPPING_PRIMITIVES,
                ..QueryPoolCreateInfo::query_type(QueryType::PipelineStatistics)
            },
        )
        .unwrap();

        assert_eq!(pool.bo().size(), 16 + 2 * 6 * 16);
        assert_eq!(pool.result_len(QueryResultFlags::WITH_AVAILABILITY), 4);

        // One report per statistic at begin.
        let begin = pool.begin_push(1);
        assert_eq!(begin.len(), 3 * 5);
    }

    #[test]
    fn reset_releases_then_acquires() {
        let (device, _service) = dev!();
        let pool = pool(&device, QueryType::Timestamp, 4);
        let push = pool.reset_push(1, 2);
        let dwords = push.as_slice();

        assert_eq!(dwords.len(), 4 * 5);

        let avail = pool.bo().gpu_addr() + 4;
        assert_eq!(
            &dwords[..4],
            &[
                nv::sq(Subchannel::ThreeD, mthd::three_d::SET_REPORT_SEMAPHORE_A, 4),
                (avail >> 32) as u32,
                avail as u32,
                0,
            ],
        );
        assert_eq!(dwords[4], 0x1000_f010);

        let acquire = &dwords[10..15];
        assert_eq!(acquire[0], nv::sq(Subchannel::ThreeD, mthd::host::SEMAPHORE_A, 4));
        assert_eq!(acquire[2], (avail as u32) >> 2);
        assert_eq!(acquire[4], 0x0100_1001);
    }

    #[test]
    fn results_from_reports() {
        let (device, _service) = dev!();
        let pool = pool(&device, QueryType::Occlusion, 2);
        let mut results = [0u64; 4];

        assert!(!pool
            .get_results(0..2, &mut results, QueryResultFlags::WITH_AVAILABILITY)
            .unwrap());
        assert_eq!(results, [0; 4]);

        // Pretend the GPU wrote begin = 10 and end = 52 for query 1, and made it available.
        unsafe {
            pool.bo().write(4, &1u32.to_le_bytes());
            pool.bo().write(16 + 32, &10u64.to_le_bytes());
            pool.bo().write(16 + 48, &52u64.to_le_bytes());
        }

        assert!(pool.result_available(1));
        assert!(pool
            .get_results(1..2, &mut results[..2], QueryResultFlags::WITH_AVAILABILITY)
            .unwrap());
        assert_eq!(&results[..2], &[42, 1]);

        pool.reset(1..2).unwrap();
        assert!(!pool.result_available(1));
    }

    #[test]
    fn timestamp_rejects_partial() {
        let (device, _service) = dev!();
        let pool = pool(&device, QueryType::Timestamp, 1);
        let mut results = [0u32; 1];

        assert!(matches!(
            pool.get_results(0..1, &mut results, QueryResultFlags::PARTIAL),
            Err(Validated::ValidationError(_)),
        ));
    }

    #[test]
    fn occlusion_query_recording() {
        let (device, _service) = dev!();
        let pool = pool(&device, QueryType::Occlusion, 2);
        let mut cb = recording(&device);

        cb.reset_query_pool(&pool, 0, 2).unwrap();
        cb.begin_query(&pool, 1).unwrap();
        assert!(cb.begin_query(&pool, 1).is_err());
        assert!(cb.end().is_err());
        cb.end_query(&pool, 1).unwrap();
        assert!(cb.end_query(&pool, 1).is_err());
        assert!(cb.write_timestamp(&pool, 0).is_err());
        assert!(cb.begin_query(&pool, 2).is_err());

        let dwords = cb.stream_dwords();
        let zpass = |enable| nv::immd(Subchannel::ThreeD, mthd::three_d::SET_ZPASS_PIXEL_COUNT, enable);
        let begin = dwords.iter().position(|&dw| dw == zpass(1)).unwrap();
        let end = dwords.iter().position(|&dw| dw == zpass(0)).unwrap();
        assert!(begin < end);

        // End reports into the second slot, then releases availability.
        let end_report = pool.bo().gpu_addr() + 16 + 32 + 16;
        assert_eq!(dwords[end + 3], end_report as u32);
        assert_eq!(dwords[end + 8], pool.bo().gpu_addr() as u32 + 4);
        assert_eq!(dwords[end + 9], 1);

        cb.end().unwrap();
        assert!(cb.bo_access(pool.bo()).is_some());
    }
}
