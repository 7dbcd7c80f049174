// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Records of the Gen (Intel-like) immediate-mode 3D pipeline.
//!
//! Command packets carry their opcode in the upper half of dword 0 and `dword_len - 2` in the
//! lower bits. Packets that are merged with a pipeline partial split their fields between the
//! two sides: the pipeline fills the fields that only depend on shaders, and the draw-time
//! overlay fills the fields that depend on dynamic state. The field tables below keep the two
//! groups in separate bit windows.
//!
//! State records (`SF_CLIP_VIEWPORT`, `BLEND_STATE`, ...) are written to dynamic-state memory and
//! pointed to by the matching `*_POINTERS` packet.

use super::{hw_enum, record};
use crate::pipeline::state::{
    BlendFactor as VkBlendFactor, BlendOp, CompareOp, CullMode as VkCullMode, FrontFace,
    LogicOp, PolygonMode, PrimitiveTopology, ProvokingVertexMode, StencilOp as VkStencilOp,
};

/// The number of render targets a `BLEND_STATE` table always carries.
pub const MAX_RTS: usize = 8;

/// The number of viewports the hardware supports.
pub const MAX_VIEWPORTS: usize = 16;

/// The half-size of the hardware guardband in pixels.
pub const GUARDBAND_SIZE: f32 = 16384.0;

/// `MI_NOOP`.
pub const MI_NOOP: u32 = 0;

/// Header of `3DSTATE_VERTEX_ELEMENTS`, followed by `VERTEX_ELEMENT_STATE` records.
pub const VERTEX_ELEMENTS_HEADER: u32 = 0x7809_0000;

/// Header of `3DSTATE_VERTEX_BUFFERS`, followed by `VERTEX_BUFFER_STATE` records.
pub const VERTEX_BUFFERS_HEADER: u32 = 0x7808_0000;

/// MMIO offset of the `CACHE_MODE_0` register.
pub const CACHE_MODE_0_NUM: u32 = 0x7000;

hw_enum! {
    pub enum BlendFactor {
        One = 0x1,
        SrcColor = 0x2,
        SrcAlpha = 0x3,
        DstAlpha = 0x4,
        DstColor = 0x5,
        SrcAlphaSaturate = 0x6,
        ConstColor = 0x7,
        ConstAlpha = 0x8,
        Src1Color = 0x9,
        Src1Alpha = 0xa,
        #[default]
        Zero = 0x11,
        InvSrcColor = 0x12,
        InvSrcAlpha = 0x13,
        InvDstAlpha = 0x14,
        InvDstColor = 0x15,
        InvConstColor = 0x17,
        InvConstAlpha = 0x18,
        InvSrc1Color = 0x19,
        InvSrc1Alpha = 0x1a,
    }

    pub enum BlendFunction {
        #[default]
        Add = 0,
        Subtract = 1,
        ReverseSubtract = 2,
        Min = 3,
        Max = 4,
    }

    pub enum CompareFunction {
        #[default]
        Always = 0,
        Never = 1,
        Less = 2,
        Equal = 3,
        LessEqual = 4,
        Greater = 5,
        NotEqual = 6,
        GreaterEqual = 7,
    }

    pub enum StencilOp {
        #[default]
        Keep = 0,
        Zero = 1,
        Replace = 2,
        IncrSat = 3,
        DecrSat = 4,
        Incr = 5,
        Decr = 6,
        Invert = 7,
    }

    pub enum CullMode {
        Both = 0,
        #[default]
        None = 1,
        Front = 2,
        Back = 3,
    }

    pub enum FrontWinding {
        #[default]
        Cw = 0,
        Ccw = 1,
    }

    pub enum FillMode {
        #[default]
        Solid = 0,
        Wireframe = 1,
        Point = 2,
    }

    pub enum LogicOpFunction {
        #[default]
        Clear = 0x0,
        Nor = 0x1,
        AndInverted = 0x2,
        CopyInverted = 0x3,
        AndReverse = 0x4,
        Invert = 0x5,
        Xor = 0x6,
        Nand = 0x7,
        And = 0x8,
        Equiv = 0x9,
        Noop = 0xa,
        OrInverted = 0xb,
        Copy = 0xc,
        OrReverse = 0xd,
        Or = 0xe,
        Set = 0xf,
    }

    /// `3DSTATE_CLIP::APIMode`.
    pub enum ClipApiMode {
        #[default]
        Ogl = 0,
        D3d = 1,
    }

    /// `3DSTATE_RASTER::APIMode`.
    pub enum RasterApiMode {
        #[default]
        Dx9Ogl = 0,
        Dx100 = 1,
        Dx101 = 2,
    }

    pub enum ReorderMode {
        #[default]
        Leading = 0,
        Trailing = 1,
    }

    /// `3DSTATE_TE::OutputTopology`.
    pub enum OutputTopology {
        #[default]
        Point = 0,
        Line = 1,
        TriCw = 2,
        TriCcw = 3,
    }

    pub enum ForceThreadDispatch {
        #[default]
        Normal = 0,
        ForceOff = 1,
        ForceOn = 2,
    }

    pub enum ForceRendering {
        #[default]
        Normal = 0,
        ForceOff = 2,
        ForceOn = 3,
    }

    pub enum IndexFormat {
        #[default]
        Byte = 0,
        Word = 1,
        Dword = 2,
    }

    pub enum CpsMode {
        #[default]
        None = 0,
        Constant = 1,
    }

    pub enum ColorClampRange {
        #[default]
        Unorm = 0,
        Snorm = 1,
        RtFormat = 2,
    }

    pub enum ComponentControl {
        #[default]
        NoStore = 0,
        StoreSrc = 1,
        Store0 = 2,
        Store1Fp = 3,
    }

    /// `PIPE_CONTROL::PostSyncOperation`.
    pub enum PostSyncOp {
        #[default]
        NoWrite = 0,
        WriteImmediateData = 1,
        WritePsDepthCount = 2,
        WriteTimestamp = 3,
    }
}

record! {
    pub struct Clip("3DSTATE_CLIP", 16, 4, header = 0x7812_0000) {
        // Pipeline partial.
        statistics_enable: bool => (1, 10, 1, Bool),
        early_cull_enable: bool => (1, 18, 1, Bool),
        clip_enable: bool => (2, 31, 1, Bool),
        guardband_clip_test_enable: bool => (2, 26, 1, Bool),
        user_clip_distance_clip_test_enable_bitmask: u8 => (2, 16, 8, Uint),
        clip_mode: u32 => (2, 13, 3, Uint),
        perspective_divide_disable: bool => (2, 9, 1, Bool),
        non_perspective_barycentric_enable: bool => (2, 8, 1, Bool),
        minimum_point_width: f32 => (3, 17, 11, Fixed { frac_bits: 3, signed: false }),
        maximum_point_width: f32 => (3, 6, 11, Fixed { frac_bits: 3, signed: false }),
        force_zero_rta_index_enable: bool => (3, 5, 1, Bool),

        // Draw-time overlay.
        api_mode: ClipApiMode => (2, 30, 1, Uint),
        viewport_xy_clip_test_enable: bool => (2, 28, 1, Bool),
        triangle_strip_list_provoking_vertex_select: u32 => (2, 0, 2, Uint),
        line_strip_list_provoking_vertex_select: u32 => (2, 2, 2, Uint),
        triangle_fan_provoking_vertex_select: u32 => (2, 4, 2, Uint),
        maximum_vp_index: u32 => (3, 0, 4, Uint),
    }

    pub struct Streamout("3DSTATE_STREAMOUT", 20, 4, header = 0x781e_0000) {
        // Pipeline partial.
        so_function_enable: bool => (1, 31, 1, Bool),
        so_statistics_enable: bool => (1, 25, 1, Bool),
        stream0_vertex_read_length: u32 => (2, 0, 5, Uint),
        stream1_vertex_read_length: u32 => (2, 8, 5, Uint),
        stream2_vertex_read_length: u32 => (2, 16, 5, Uint),
        stream3_vertex_read_length: u32 => (2, 24, 5, Uint),
        buffer0_surface_pitch: u32 => (3, 0, 12, Uint),
        buffer1_surface_pitch: u32 => (3, 16, 12, Uint),
        buffer2_surface_pitch: u32 => (4, 0, 12, Uint),
        buffer3_surface_pitch: u32 => (4, 16, 12, Uint),

        // Draw-time overlay.
        rendering_disable: bool => (1, 30, 1, Bool),
        render_stream_select: u32 => (1, 27, 2, Uint),
        reorder_mode: ReorderMode => (1, 26, 1, Uint),
        force_rendering: ForceRendering => (1, 23, 2, Uint),
    }

    pub struct ViewportStatePointersSfClip(
        "3DSTATE_VIEWPORT_STATE_POINTERS_SF_CLIP", 12, 4, header = 0x7821_0000
    ) {
        sf_clip_viewport_pointer: u64 => (1, 6, 58, Address { shift: 6 }),
    }

    pub struct ViewportStatePointersCc(
        "3DSTATE_VIEWPORT_STATE_POINTERS_CC", 12, 4, header = 0x7823_0000
    ) {
        cc_viewport_pointer: u64 => (1, 5, 59, Address { shift: 5 }),
    }

    pub struct ScissorStatePointers("3DSTATE_SCISSOR_STATE_POINTERS", 12, 4, header = 0x780f_0000) {
        scissor_rect_pointer: u64 => (1, 5, 59, Address { shift: 5 }),
    }

    pub struct VfTopology("3DSTATE_VF_TOPOLOGY", 8, 4, header = 0x784b_0000) {
        primitive_topology_type: u32 => (1, 0, 6, Uint),
    }

    pub struct VertexElementState("VERTEX_ELEMENT_STATE", 8, 4) {
        vertex_buffer_index: u32 => (0, 26, 6, Uint),
        valid: bool => (0, 25, 1, Bool),
        source_element_format: u32 => (0, 16, 9, Uint),
        edge_flag_enable: bool => (0, 15, 1, Bool),
        source_element_offset: u32 => (0, 0, 12, Uint),
        component0_control: ComponentControl => (1, 28, 3, Uint),
        component1_control: ComponentControl => (1, 24, 3, Uint),
        component2_control: ComponentControl => (1, 20, 3, Uint),
        component3_control: ComponentControl => (1, 16, 3, Uint),
    }

    pub struct VertexBufferState("VERTEX_BUFFER_STATE", 16, 4) {
        vertex_buffer_index: u32 => (0, 26, 6, Uint),
        address_modify_enable: bool => (0, 14, 1, Bool),
        null_vertex_buffer: bool => (0, 13, 1, Bool),
        buffer_pitch: u32 => (0, 0, 12, Uint),
        buffer_starting_address: u64 => (1, 0, 64, Address { shift: 0 }),
        buffer_size: u32 => (3, 0, 32, Uint),
    }

    pub struct Te("3DSTATE_TE", 20, 4, header = 0x781c_0000) {
        // Pipeline partial.
        partitioning: u32 => (1, 12, 2, Uint),
        te_domain: u32 => (1, 4, 2, Uint),
        te_mode: u32 => (1, 1, 2, Uint),
        te_enable: bool => (1, 0, 1, Bool),
        maximum_tessellation_factor_odd: f32 => (2, 0, 32, Float),
        maximum_tessellation_factor_not_odd: f32 => (3, 0, 32, Float),

        // Draw-time overlay.
        output_topology: OutputTopology => (1, 8, 2, Uint),
    }

    pub struct Gs("3DSTATE_GS", 40, 4, header = 0x7811_0000) {
        // Pipeline partial.
        kernel_start_pointer: u64 => (1, 6, 58, Address { shift: 6 }),
        vector_mask_enable: bool => (3, 30, 1, Bool),
        sampler_count: u32 => (3, 27, 3, Uint),
        binding_table_entry_count: u32 => (3, 18, 8, Uint),
        dispatch_grf_start_register_for_urb_data: u32 => (6, 0, 4, Uint),
        output_vertex_size: u32 => (6, 23, 6, Uint),
        output_topology: u32 => (6, 17, 6, Uint),
        vertex_urb_entry_read_length: u32 => (6, 11, 6, Uint),
        include_vertex_handles: bool => (6, 10, 1, Bool),
        vertex_urb_entry_read_offset: u32 => (6, 4, 6, Uint),
        maximum_number_of_threads: u32 => (7, 16, 9, Uint),
        control_data_header_size: u32 => (7, 8, 4, Uint),
        instance_control: u32 => (7, 26, 5, Uint),
        statistics_enable: bool => (7, 6, 1, Bool),
        function_enable: bool => (7, 0, 1, Bool),

        // Draw-time overlay.
        reorder_mode: ReorderMode => (7, 2, 1, Uint),
    }

    pub struct Cps("3DSTATE_CPS", 12, 4, header = 0x7853_0000) {
        coarse_pixel_shading_mode: CpsMode => (1, 0, 2, Uint),
        min_cp_size_x: u32 => (2, 0, 8, Uint),
        min_cp_size_y: u32 => (2, 16, 8, Uint),
    }

    pub struct CpsPointers("3DSTATE_CPS_POINTERS", 12, 4, header = 0x7822_0000) {
        coarse_pixel_shading_state_array_pointer: u64 => (1, 5, 59, Address { shift: 5 }),
    }

    /// One entry of the coarse pixel shading state array.
    pub struct CpsState("CPS_STATE", 8, 4) {
        coarse_pixel_shading_mode: CpsMode => (0, 0, 2, Uint),
        combiner0_op: u32 => (0, 4, 3, Uint),
        combiner1_op: u32 => (0, 8, 3, Uint),
        min_cp_size_x: u32 => (1, 0, 8, Uint),
        min_cp_size_y: u32 => (1, 16, 8, Uint),
    }

    pub struct Sf("3DSTATE_SF", 16, 4, header = 0x7813_0000) {
        // Pipeline partial.
        statistics_enable: bool => (1, 10, 1, Bool),
        viewport_transform_enable: bool => (1, 1, 1, Bool),
        last_pixel_enable: bool => (3, 31, 1, Bool),
        aa_line_distance_mode: bool => (3, 14, 1, Bool),
        point_width_source: bool => (3, 11, 1, Bool),
        point_width: f32 => (3, 0, 11, Fixed { frac_bits: 3, signed: false }),

        // Draw-time overlay.
        line_width: f32 => (1, 12, 18, Fixed { frac_bits: 7, signed: false }),
        legacy_global_depth_bias_enable: bool => (1, 11, 1, Bool),
        triangle_strip_list_provoking_vertex_select: u32 => (3, 29, 2, Uint),
        line_strip_list_provoking_vertex_select: u32 => (3, 27, 2, Uint),
        triangle_fan_provoking_vertex_select: u32 => (3, 25, 2, Uint),
    }

    pub struct Raster("3DSTATE_RASTER", 20, 4, header = 0x7850_0000) {
        // Pipeline partial.
        forced_sample_count: u32 => (1, 18, 3, Uint),
        force_multisampling: bool => (1, 14, 1, Bool),
        smooth_point_enable: bool => (1, 13, 1, Bool),
        dx_multisample_rasterization_mode: u32 => (1, 10, 2, Uint),
        scissor_rectangle_enable: bool => (1, 1, 1, Bool),

        // Draw-time overlay.
        viewport_z_far_clip_test_enable: bool => (1, 26, 1, Bool),
        conservative_rasterization_enable: bool => (1, 24, 1, Bool),
        api_mode: RasterApiMode => (1, 22, 2, Uint),
        front_winding: FrontWinding => (1, 21, 1, Uint),
        cull_mode: CullMode => (1, 16, 2, Uint),
        dx_multisample_rasterization_enable: bool => (1, 12, 1, Bool),
        global_depth_offset_enable_solid: bool => (1, 9, 1, Bool),
        global_depth_offset_enable_wireframe: bool => (1, 8, 1, Bool),
        global_depth_offset_enable_point: bool => (1, 7, 1, Bool),
        front_face_fill_mode: FillMode => (1, 5, 2, Uint),
        back_face_fill_mode: FillMode => (1, 3, 2, Uint),
        antialiasing_enable: bool => (1, 2, 1, Bool),
        viewport_z_near_clip_test_enable: bool => (1, 0, 1, Bool),
        global_depth_offset_constant: f32 => (2, 0, 32, Float),
        global_depth_offset_scale: f32 => (3, 0, 32, Float),
        global_depth_offset_clamp: f32 => (4, 0, 32, Float),
    }

    pub struct SampleMask("3DSTATE_SAMPLE_MASK", 8, 4, header = 0x7818_0000) {
        sample_mask: u32 => (1, 0, 16, Uint),
    }

    pub struct WmDepthStencil("3DSTATE_WM_DEPTH_STENCIL", 16, 4, header = 0x784e_0000) {
        stencil_fail_op: StencilOp => (1, 29, 3, Uint),
        stencil_pass_depth_fail_op: StencilOp => (1, 26, 3, Uint),
        stencil_pass_depth_pass_op: StencilOp => (1, 23, 3, Uint),
        backface_stencil_test_function: CompareFunction => (1, 20, 3, Uint),
        backface_stencil_fail_op: StencilOp => (1, 17, 3, Uint),
        backface_stencil_pass_depth_fail_op: StencilOp => (1, 14, 3, Uint),
        backface_stencil_pass_depth_pass_op: StencilOp => (1, 11, 3, Uint),
        stencil_test_function: CompareFunction => (1, 8, 3, Uint),
        depth_test_function: CompareFunction => (1, 5, 3, Uint),
        double_sided_stencil_enable: bool => (1, 4, 1, Bool),
        stencil_test_enable: bool => (1, 3, 1, Bool),
        stencil_buffer_write_enable: bool => (1, 2, 1, Bool),
        depth_test_enable: bool => (1, 1, 1, Bool),
        depth_buffer_write_enable: bool => (1, 0, 1, Bool),
        stencil_test_mask: u32 => (2, 24, 8, Uint),
        stencil_write_mask: u32 => (2, 16, 8, Uint),
        backface_stencil_test_mask: u32 => (2, 8, 8, Uint),
        backface_stencil_write_mask: u32 => (2, 0, 8, Uint),
        stencil_reference_value: u32 => (3, 8, 8, Uint),
        backface_stencil_reference_value: u32 => (3, 0, 8, Uint),
    }

    pub struct DepthBounds("3DSTATE_DEPTH_BOUNDS", 16, 4, header = 0x7871_0000) {
        depth_bounds_test_enable: bool => (1, 0, 1, Bool),
        depth_bounds_test_min_value: f32 => (2, 0, 32, Float),
        depth_bounds_test_max_value: f32 => (3, 0, 32, Float),
    }

    pub struct LineStipple("3DSTATE_LINE_STIPPLE", 12, 4, header = 0x7908_0000) {
        modify_enable_current_repeat_counter_current_stipple_index: bool => (1, 31, 1, Bool),
        current_repeat_counter: u32 => (1, 21, 9, Uint),
        current_stipple_index: u32 => (1, 16, 4, Uint),
        line_stipple_pattern: u32 => (1, 0, 16, Uint),
        line_stipple_inverse_repeat_count: f32 => (2, 15, 17, Fixed { frac_bits: 16, signed: false }),
        line_stipple_repeat_count: u32 => (2, 0, 9, Uint),
    }

    pub struct Vf("3DSTATE_VF", 12, 4, header = 0x780c_0000) {
        indexed_draw_cut_index_enable: bool => (1, 0, 1, Bool),
        cut_index: u32 => (2, 0, 32, Uint),
    }

    pub struct IndexBuffer("3DSTATE_INDEX_BUFFER", 20, 4, header = 0x780a_0000) {
        index_format: IndexFormat => (1, 8, 2, Uint),
        mocs: u32 => (1, 0, 7, Uint),
        buffer_starting_address: u64 => (2, 0, 64, Address { shift: 0 }),
        buffer_size: u32 => (4, 0, 32, Uint),
    }

    /// Sample positions for every sample count. Each position is one byte holding X in the
    /// high and Y in the low nibble, in 0.4 fixed point.
    pub struct SamplePattern("3DSTATE_SAMPLE_PATTERN", 36, 4, header = 0x791c_0000) {
        samples_16x_0_3: u32 => (1, 0, 32, Uint),
        samples_16x_4_7: u32 => (2, 0, 32, Uint),
        samples_16x_8_11: u32 => (3, 0, 32, Uint),
        samples_16x_12_15: u32 => (4, 0, 32, Uint),
        samples_8x_0_3: u32 => (5, 0, 32, Uint),
        samples_8x_4_7: u32 => (6, 0, 32, Uint),
        samples_4x: u32 => (7, 0, 32, Uint),
        samples_2x: u32 => (8, 0, 16, Uint),
        samples_1x: u32 => (8, 16, 8, Uint),
    }

    pub struct Wm("3DSTATE_WM", 8, 4, header = 0x7814_0000) {
        // Pipeline partial.
        statistics_enable: bool => (1, 31, 1, Bool),
        early_depth_stencil_control: u32 => (1, 21, 2, Uint),
        position_zw_interpolation_mode: u32 => (1, 17, 2, Uint),
        barycentric_interpolation_mode: u32 => (1, 11, 6, Uint),
        line_end_cap_antialiasing_region_width: u32 => (1, 8, 2, Uint),
        line_antialiasing_region_width: u32 => (1, 6, 2, Uint),
        point_rasterization_rule: bool => (1, 2, 1, Bool),
        force_kill_pixel_enable: u32 => (1, 0, 2, Uint),

        // Draw-time overlay.
        force_thread_dispatch_enable: ForceThreadDispatch => (1, 19, 2, Uint),
        line_stipple_enable: bool => (1, 3, 1, Bool),
    }

    pub struct PsBlend("3DSTATE_PS_BLEND", 8, 4, header = 0x784d_0000) {
        alpha_to_coverage_enable: bool => (1, 31, 1, Bool),
        has_writeable_rt: bool => (1, 30, 1, Bool),
        color_buffer_blend_enable: bool => (1, 29, 1, Bool),
        source_alpha_blend_factor: BlendFactor => (1, 24, 5, Uint),
        destination_alpha_blend_factor: BlendFactor => (1, 19, 5, Uint),
        source_blend_factor: BlendFactor => (1, 14, 5, Uint),
        destination_blend_factor: BlendFactor => (1, 9, 5, Uint),
        alpha_test_enable: bool => (1, 8, 1, Bool),
        independent_alpha_blend_enable: bool => (1, 7, 1, Bool),
    }

    pub struct BlendStatePointers("3DSTATE_BLEND_STATE_POINTERS", 12, 4, header = 0x7824_0000) {
        blend_state_pointer_valid: bool => (1, 0, 1, Bool),
        blend_state_pointer: u64 => (1, 6, 58, Address { shift: 6 }),
    }

    pub struct CcStatePointers("3DSTATE_CC_STATE_POINTERS", 12, 4, header = 0x780e_0000) {
        color_calc_state_pointer_valid: bool => (1, 0, 1, Bool),
        color_calc_state_pointer: u64 => (1, 6, 58, Address { shift: 6 }),
    }

    /// Points the shader stages at the draw's root descriptor table.
    pub struct ConstantAll("3DSTATE_CONSTANT_ALL", 20, 4, header = 0x786d_0000) {
        shader_update_enable: u32 => (1, 0, 5, Uint),
        root_table_address: u64 => (2, 6, 58, Address { shift: 6 }),
        root_table_size: u32 => (4, 0, 16, Uint),
    }

    pub struct Primitive("3DPRIMITIVE", 28, 4, header = 0x7b00_0000) {
        vertex_access_type_random: bool => (1, 8, 1, Bool),
        primitive_topology_type: u32 => (1, 0, 6, Uint),
        vertex_count_per_instance: u32 => (2, 0, 32, Uint),
        start_vertex_location: u32 => (3, 0, 32, Uint),
        instance_count: u32 => (4, 0, 32, Uint),
        start_instance_location: u32 => (5, 0, 32, Uint),
        base_vertex_location: i32 => (6, 0, 32, Int),
    }

    pub struct ComputeWalker("COMPUTE_WALKER", 36, 4, header = 0x7202_0000) {
        kernel_start_pointer: u64 => (1, 6, 58, Address { shift: 6 }),
        root_table_address: u64 => (3, 6, 58, Address { shift: 6 }),
        thread_group_id_x_dimension: u32 => (5, 0, 32, Uint),
        thread_group_id_y_dimension: u32 => (6, 0, 32, Uint),
        thread_group_id_z_dimension: u32 => (7, 0, 32, Uint),
        shared_local_memory_size: u32 => (8, 0, 16, Uint),
        barrier_enable: bool => (8, 16, 1, Bool),
    }

    pub struct PipeControl("PIPE_CONTROL", 24, 4, header = 0x7a00_0000) {
        depth_cache_flush_enable: bool => (1, 0, 1, Bool),
        stall_at_pixel_scoreboard: bool => (1, 1, 1, Bool),
        state_cache_invalidation_enable: bool => (1, 2, 1, Bool),
        constant_cache_invalidation_enable: bool => (1, 3, 1, Bool),
        vf_cache_invalidation_enable: bool => (1, 4, 1, Bool),
        dc_flush_enable: bool => (1, 5, 1, Bool),
        pipe_control_flush_enable: bool => (1, 7, 1, Bool),
        texture_cache_invalidation_enable: bool => (1, 10, 1, Bool),
        instruction_cache_invalidate_enable: bool => (1, 11, 1, Bool),
        render_target_cache_flush_enable: bool => (1, 12, 1, Bool),
        depth_stall_enable: bool => (1, 13, 1, Bool),
        post_sync_operation: PostSyncOp => (1, 14, 2, Uint),
        pss_stall_sync_enable: bool => (1, 17, 1, Bool),
        command_streamer_stall_enable: bool => (1, 20, 1, Bool),
        tile_cache_flush_enable: bool => (1, 28, 1, Bool),
        address: u64 => (2, 2, 62, Address { shift: 2 }),
        immediate_data: u64 => (4, 0, 64, Uint),
    }

    /// `MI_LOAD_REGISTER_IMM` with a single register write.
    pub struct MiLoadRegisterImm("MI_LOAD_REGISTER_IMM", 12, 4, header = 0x1100_0000) {
        register_offset: u32 => (1, 2, 21, Address { shift: 2 }),
        data_dword: u32 => (2, 0, 32, Uint),
    }

    pub struct CacheMode0("CACHE_MODE_0", 4, 4) {
        stc_pma_optimization_enable: bool => (0, 5, 1, Bool),
        stc_pma_optimization_enable_mask: bool => (0, 21, 1, Bool),
    }

    pub struct SfClipViewport("SF_CLIP_VIEWPORT", 64, 64) {
        viewport_matrix_element_m00: f32 => (0, 0, 32, Float),
        viewport_matrix_element_m11: f32 => (1, 0, 32, Float),
        viewport_matrix_element_m22: f32 => (2, 0, 32, Float),
        viewport_matrix_element_m30: f32 => (3, 0, 32, Float),
        viewport_matrix_element_m31: f32 => (4, 0, 32, Float),
        viewport_matrix_element_m32: f32 => (5, 0, 32, Float),
        x_min_clip_guardband: f32 => (8, 0, 32, Float),
        x_max_clip_guardband: f32 => (9, 0, 32, Float),
        y_min_clip_guardband: f32 => (10, 0, 32, Float),
        y_max_clip_guardband: f32 => (11, 0, 32, Float),
        x_min_viewport: f32 => (12, 0, 32, Float),
        x_max_viewport: f32 => (13, 0, 32, Float),
        y_min_viewport: f32 => (14, 0, 32, Float),
        y_max_viewport: f32 => (15, 0, 32, Float),
    }

    pub struct CcViewport("CC_VIEWPORT", 8, 32) {
        minimum_depth: f32 => (0, 0, 32, Float),
        maximum_depth: f32 => (1, 0, 32, Float),
    }

    pub struct ScissorRect("SCISSOR_RECT", 8, 64) {
        scissor_rectangle_y_min: u32 => (0, 16, 16, Uint),
        scissor_rectangle_x_min: u32 => (0, 0, 16, Uint),
        scissor_rectangle_y_max: u32 => (1, 16, 16, Uint),
        scissor_rectangle_x_max: u32 => (1, 0, 16, Uint),
    }

    pub struct BlendState("BLEND_STATE", 4, 64) {
        alpha_to_coverage_enable: bool => (0, 31, 1, Bool),
        independent_alpha_blend_enable: bool => (0, 30, 1, Bool),
        alpha_to_one_enable: bool => (0, 29, 1, Bool),
        alpha_to_coverage_dither_enable: bool => (0, 28, 1, Bool),
        alpha_test_enable: bool => (0, 27, 1, Bool),
        alpha_test_function: CompareFunction => (0, 24, 3, Uint),
        color_dither_enable: bool => (0, 23, 1, Bool),
    }

    pub struct BlendStateEntry("BLEND_STATE_ENTRY", 8, 4) {
        color_buffer_blend_enable: bool => (0, 31, 1, Bool),
        source_blend_factor: BlendFactor => (0, 26, 5, Uint),
        destination_blend_factor: BlendFactor => (0, 21, 5, Uint),
        color_blend_function: BlendFunction => (0, 18, 3, Uint),
        source_alpha_blend_factor: BlendFactor => (0, 13, 5, Uint),
        destination_alpha_blend_factor: BlendFactor => (0, 8, 5, Uint),
        alpha_blend_function: BlendFunction => (0, 5, 3, Uint),
        write_disable_alpha: bool => (0, 0, 1, Bool),
        write_disable_red: bool => (0, 3, 1, Bool),
        write_disable_green: bool => (0, 2, 1, Bool),
        write_disable_blue: bool => (0, 1, 1, Bool),
        logic_op_enable: bool => (1, 31, 1, Bool),
        logic_op_function: LogicOpFunction => (1, 27, 4, Uint),
        pre_blend_source_only_clamp_enable: bool => (1, 4, 1, Bool),
        color_clamp_range: ColorClampRange => (1, 2, 2, Uint),
        pre_blend_color_clamp_enable: bool => (1, 1, 1, Bool),
        post_blend_color_clamp_enable: bool => (1, 0, 1, Bool),
    }

    pub struct ColorCalcState("COLOR_CALC_STATE", 24, 64) {
        alpha_test_format: u32 => (0, 0, 1, Uint),
        round_disable_function_disable: bool => (0, 15, 1, Bool),
        alpha_reference_value: f32 => (1, 0, 32, Float),
        blend_constant_color_red: f32 => (2, 0, 32, Float),
        blend_constant_color_green: f32 => (3, 0, 32, Float),
        blend_constant_color_blue: f32 => (4, 0, 32, Float),
        blend_constant_color_alpha: f32 => (5, 0, 32, Float),
    }
}

/// `3DPRIM_*` topology values.
pub mod prim {
    pub const POINTLIST: u32 = 0x01;
    pub const LINELIST: u32 = 0x02;
    pub const LINESTRIP: u32 = 0x03;
    pub const TRILIST: u32 = 0x04;
    pub const TRISTRIP: u32 = 0x05;
    pub const TRIFAN: u32 = 0x06;
    pub const LINELIST_ADJ: u32 = 0x09;
    pub const LINESTRIP_ADJ: u32 = 0x0a;
    pub const TRILIST_ADJ: u32 = 0x0c;
    pub const TRISTRIP_ADJ: u32 = 0x0d;
    pub const PATCHLIST_1: u32 = 0x20;

    /// Returns the topology of a patch list with `control_points` vertices per patch.
    #[inline]
    pub const fn patchlist(control_points: u32) -> u32 {
        PATCHLIST_1 + control_points - 1
    }
}

/// Returns the hardware topology for `topology`. Patch lists take `patch_control_points`.
pub fn primitive_topology(topology: PrimitiveTopology, patch_control_points: u32) -> u32 {
    match topology {
        PrimitiveTopology::PointList => prim::POINTLIST,
        PrimitiveTopology::LineList => prim::LINELIST,
        PrimitiveTopology::LineStrip => prim::LINESTRIP,
        PrimitiveTopology::TriangleList => prim::TRILIST,
        PrimitiveTopology::TriangleStrip => prim::TRISTRIP,
        PrimitiveTopology::TriangleFan => prim::TRIFAN,
        PrimitiveTopology::LineListWithAdjacency => prim::LINELIST_ADJ,
        PrimitiveTopology::LineStripWithAdjacency => prim::LINESTRIP_ADJ,
        PrimitiveTopology::TriangleListWithAdjacency => prim::TRILIST_ADJ,
        PrimitiveTopology::TriangleStripWithAdjacency => prim::TRISTRIP_ADJ,
        PrimitiveTopology::PatchList => prim::patchlist(patch_control_points.max(1)),
    }
}

impl From<VkBlendFactor> for BlendFactor {
    fn from(val: VkBlendFactor) -> Self {
        match val {
            VkBlendFactor::Zero => Self::Zero,
            VkBlendFactor::One => Self::One,
            VkBlendFactor::SrcColor => Self::SrcColor,
            VkBlendFactor::OneMinusSrcColor => Self::InvSrcColor,
            VkBlendFactor::DstColor => Self::DstColor,
            VkBlendFactor::OneMinusDstColor => Self::InvDstColor,
            VkBlendFactor::SrcAlpha => Self::SrcAlpha,
            VkBlendFactor::OneMinusSrcAlpha => Self::InvSrcAlpha,
            VkBlendFactor::DstAlpha => Self::DstAlpha,
            VkBlendFactor::OneMinusDstAlpha => Self::InvDstAlpha,
            VkBlendFactor::ConstantColor => Self::ConstColor,
            VkBlendFactor::OneMinusConstantColor => Self::InvConstColor,
            VkBlendFactor::ConstantAlpha => Self::ConstAlpha,
            VkBlendFactor::OneMinusConstantAlpha => Self::InvConstAlpha,
            VkBlendFactor::SrcAlphaSaturate => Self::SrcAlphaSaturate,
            VkBlendFactor::Src1Color => Self::Src1Color,
            VkBlendFactor::OneMinusSrc1Color => Self::InvSrc1Color,
            VkBlendFactor::Src1Alpha => Self::Src1Alpha,
            VkBlendFactor::OneMinusSrc1Alpha => Self::InvSrc1Alpha,
        }
    }
}

impl From<BlendOp> for BlendFunction {
    fn from(val: BlendOp) -> Self {
        match val {
            BlendOp::Add => Self::Add,
            BlendOp::Subtract => Self::Subtract,
            BlendOp::ReverseSubtract => Self::ReverseSubtract,
            BlendOp::Min => Self::Min,
            BlendOp::Max => Self::Max,
        }
    }
}

impl From<CompareOp> for CompareFunction {
    fn from(val: CompareOp) -> Self {
        match val {
            CompareOp::Never => Self::Never,
            CompareOp::Less => Self::Less,
            CompareOp::Equal => Self::Equal,
            CompareOp::LessOrEqual => Self::LessEqual,
            CompareOp::Greater => Self::Greater,
            CompareOp::NotEqual => Self::NotEqual,
            CompareOp::GreaterOrEqual => Self::GreaterEqual,
            CompareOp::Always => Self::Always,
        }
    }
}

impl From<VkStencilOp> for StencilOp {
    fn from(val: VkStencilOp) -> Self {
        match val {
            VkStencilOp::Keep => Self::Keep,
            VkStencilOp::Zero => Self::Zero,
            VkStencilOp::Replace => Self::Replace,
            VkStencilOp::IncrementAndClamp => Self::IncrSat,
            VkStencilOp::DecrementAndClamp => Self::DecrSat,
            VkStencilOp::Invert => Self::Invert,
            VkStencilOp::IncrementAndWrap => Self::Incr,
            VkStencilOp::DecrementAndWrap => Self::Decr,
        }
    }
}

impl From<VkCullMode> for CullMode {
    fn from(val: VkCullMode) -> Self {
        match val {
            VkCullMode::None => Self::None,
            VkCullMode::Front => Self::Front,
            VkCullMode::Back => Self::Back,
            VkCullMode::FrontAndBack => Self::Both,
        }
    }
}

impl From<FrontFace> for FrontWinding {
    fn from(val: FrontFace) -> Self {
        match val {
            FrontFace::CounterClockwise => Self::Ccw,
            FrontFace::Clockwise => Self::Cw,
        }
    }
}

impl From<PolygonMode> for FillMode {
    fn from(val: PolygonMode) -> Self {
        match val {
            PolygonMode::Fill => Self::Solid,
            PolygonMode::Line => Self::Wireframe,
            PolygonMode::Point => Self::Point,
        }
    }
}

impl From<LogicOp> for LogicOpFunction {
    fn from(val: LogicOp) -> Self {
        match val {
            LogicOp::Clear => Self::Clear,
            LogicOp::And => Self::And,
            LogicOp::AndReverse => Self::AndReverse,
            LogicOp::Copy => Self::Copy,
            LogicOp::AndInverted => Self::AndInverted,
            LogicOp::Noop => Self::Noop,
            LogicOp::Xor => Self::Xor,
            LogicOp::Or => Self::Or,
            LogicOp::Nor => Self::Nor,
            LogicOp::Equivalent => Self::Equiv,
            LogicOp::Invert => Self::Invert,
            LogicOp::OrReverse => Self::OrReverse,
            LogicOp::CopyInverted => Self::CopyInverted,
            LogicOp::OrInverted => Self::OrInverted,
            LogicOp::Nand => Self::Nand,
            LogicOp::Set => Self::Set,
        }
    }
}

/// Provoking-vertex selects as `(triangle strip/list, line strip/list, triangle fan)`.
pub fn provoking_vertex_selects(mode: ProvokingVertexMode) -> (u32, u32, u32) {
    match mode {
        ProvokingVertexMode::FirstVertex => (0, 0, 1),
        ProvokingVertexMode::LastVertex => (2, 1, 2),
    }
}

/// Returns the reorder mode matching a provoking-vertex mode.
pub fn reorder_mode(mode: ProvokingVertexMode) -> ReorderMode {
    match mode {
        ProvokingVertexMode::FirstVertex => ReorderMode::Leading,
        ProvokingVertexMode::LastVertex => ReorderMode::Trailing,
    }
}

/// The single element used when the vertex shader consumes no inputs.
pub fn empty_vertex_element() -> VertexElementState {
    VertexElementState {
        valid: true,
        component0_control: ComponentControl::Store0,
        component1_control: ComponentControl::Store0,
        component2_control: ComponentControl::Store0,
        component3_control: ComponentControl::Store0,
        ..Default::default()
    }
}

/// Computes the clip-space guardband of a viewport.
///
/// `[x_min, x_max] × [y_min, y_max]` is the known render region in pixels and `m00`, `m11`,
/// `m30`, `m31` are the viewport transform. Returns `(x_min, x_max, y_min, y_max)` in NDC.
pub fn guardband(
    x_min: f32,
    x_max: f32,
    y_min: f32,
    y_max: f32,
    m00: f32,
    m11: f32,
    m30: f32,
    m31: f32,
) -> (f32, f32, f32, f32) {
    if m00 == 0.0 || m11 == 0.0 {
        // The viewport scales to nothing.
        return (0.0, 0.0, 0.0, 0.0);
    }

    let ss_xmin = x_min.min(m30 - m00).min(m30 + m00);
    let ss_xmax = x_max.max(m30 - m00).max(m30 + m00);
    let ss_ymin = y_min.min(m31 - m11).min(m31 + m11);
    let ss_ymax = y_max.max(m31 - m11).max(m31 + m11);

    // Center the guardband on the screen-space render region.
    let center_x = (ss_xmin + ss_xmax) / 2.0;
    let center_y = (ss_ymin + ss_ymax) / 2.0;

    let ndc_xmin = (center_x - GUARDBAND_SIZE - m30) / m00;
    let ndc_xmax = (center_x + GUARDBAND_SIZE - m30) / m00;
    let ndc_ymin = (center_y - GUARDBAND_SIZE - m31) / m11;
    let ndc_ymax = (center_y + GUARDBAND_SIZE - m31) / m11;

    // A negative viewport height flips Y.
    (
        ndc_xmin.min(ndc_xmax),
        ndc_xmin.max(ndc_xmax),
        ndc_ymin.min(ndc_ymax),
        ndc_ymin.max(ndc_ymax),
    )
}

/// Encodes a sample position in 0.4 fixed point per axis.
#[inline]
pub fn sample_position_byte(x: f32, y: f32) -> u32 {
    let q = |v: f32| ((v * 16.0).round_ties_even() as i32).clamp(0, 15) as u32;

    (q(x) << 4) | q(y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::{merge, PackRecord};

    #[test]
    fn header_and_length() {
        let bytes = SampleMask {
            sample_mask: 0xffff,
        }
        .to_bytes();

        assert_eq!(&bytes[..4], &0x7818_0000u32.to_le_bytes());
        assert_eq!(SampleMask::raw(&bytes, "sample_mask"), Some(0xffff));

        let clip = Clip::default().to_bytes();
        assert_eq!(u32::from_le_bytes([clip[0], clip[1], clip[2], clip[3]]), 0x7812_0002);
    }

    #[test]
    fn raster_partial_merges_with_overlay() {
        let partial = Raster {
            forced_sample_count: 2,
            scissor_rectangle_enable: true,
            ..Default::default()
        };
        let overlay = Raster {
            cull_mode: CullMode::Back,
            front_winding: FrontWinding::Ccw,
            global_depth_offset_scale: 2.0,
            viewport_z_near_clip_test_enable: true,
            ..Default::default()
        };
        let union = Raster {
            forced_sample_count: 2,
            scissor_rectangle_enable: true,
            cull_mode: CullMode::Back,
            front_winding: FrontWinding::Ccw,
            global_depth_offset_scale: 2.0,
            viewport_z_near_clip_test_enable: true,
            ..Default::default()
        };

        // Both sides carry the header, which is identical.
        let mut merged = partial.to_bytes();
        merge(&mut merged, &overlay.to_bytes());
        assert_eq!(merged, union.to_bytes());
    }

    #[test]
    fn blend_entry_fields() {
        let entry = BlendStateEntry {
            color_buffer_blend_enable: true,
            source_blend_factor: BlendFactor::One,
            destination_blend_factor: BlendFactor::Zero,
            write_disable_red: true,
            ..Default::default()
        };
        let bytes = entry.to_bytes();

        assert_eq!(BlendStateEntry::raw(&bytes, "source_blend_factor"), Some(1));
        assert_eq!(
            BlendStateEntry::raw(&bytes, "destination_blend_factor"),
            Some(0x11)
        );
        assert_eq!(BlendStateEntry::raw(&bytes, "write_disable_red"), Some(1));
        assert_eq!(BlendStateEntry::raw(&bytes, "write_disable_blue"), Some(0));
    }

    #[test]
    fn topology_table() {
        assert_eq!(primitive_topology(PrimitiveTopology::TriangleList, 0), 0x04);
        assert_eq!(primitive_topology(PrimitiveTopology::PatchList, 3), 0x22);
        assert_eq!(primitive_topology(PrimitiveTopology::PatchList, 32), 0x3f);
    }

    #[test]
    fn guardband_contains_viewport() {
        let (xmin, xmax, ymin, ymax) =
            guardband(0.0, 800.0, 0.0, 600.0, 400.0, 300.0, 400.0, 300.0);

        assert!(xmin < -1.0 && xmax > 1.0);
        assert!(ymin < -1.0 && ymax > 1.0);
        assert_eq!(xmin, -xmax);

        // Flipped viewport.
        let (_, _, ymin, ymax) =
            guardband(0.0, 800.0, 0.0, 600.0, 400.0, -300.0, 400.0, 300.0);
        assert!(ymin < ymax);

        assert_eq!(
            guardband(0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0),
            (0.0, 0.0, 0.0, 0.0)
        );
    }

    #[test]
    fn line_stipple_inverse_count() {
        let bytes = LineStipple {
            line_stipple_inverse_repeat_count: 0.25,
            line_stipple_repeat_count: 4,
            ..Default::default()
        }
        .to_bytes();

        assert_eq!(
            LineStipple::raw(&bytes, "line_stipple_inverse_repeat_count"),
            Some(0x4000)
        );
    }

    #[test]
    fn sample_positions() {
        assert_eq!(sample_position_byte(0.5, 0.5), 0x88);
        assert_eq!(sample_position_byte(1.0, 0.0), 0xf0);
    }
}
