// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! API-side vocabulary of fixed-function state.
//!
//! These mirror the Vulkan enums. The hardware encodings live in [`pack`](crate::pack), each
//! with a conversion from the types below.

use crate::macros::{vulkan_bitflags, vulkan_enum};

vulkan_enum! {
    /// A factor a blend operand is multiplied with.
    BlendFactor = BlendFactor(i32);

    Zero = ZERO,
    One = ONE,
    SrcColor = SRC_COLOR,
    OneMinusSrcColor = ONE_MINUS_SRC_COLOR,
    DstColor = DST_COLOR,
    OneMinusDstColor = ONE_MINUS_DST_COLOR,
    SrcAlpha = SRC_ALPHA,
    OneMinusSrcAlpha = ONE_MINUS_SRC_ALPHA,
    DstAlpha = DST_ALPHA,
    OneMinusDstAlpha = ONE_MINUS_DST_ALPHA,
    ConstantColor = CONSTANT_COLOR,
    OneMinusConstantColor = ONE_MINUS_CONSTANT_COLOR,
    ConstantAlpha = CONSTANT_ALPHA,
    OneMinusConstantAlpha = ONE_MINUS_CONSTANT_ALPHA,
    SrcAlphaSaturate = SRC_ALPHA_SATURATE,
    Src1Color = SRC1_COLOR,
    OneMinusSrc1Color = ONE_MINUS_SRC1_COLOR,
    Src1Alpha = SRC1_ALPHA,
    OneMinusSrc1Alpha = ONE_MINUS_SRC1_ALPHA,
}

impl BlendFactor {
    /// Returns whether the factor reads the second fragment output.
    #[inline]
    pub fn is_dual_source(self) -> bool {
        matches!(
            self,
            Self::Src1Color | Self::OneMinusSrc1Color | Self::Src1Alpha | Self::OneMinusSrc1Alpha
        )
    }

    /// Returns whether the factor reads the destination.
    #[inline]
    pub fn reads_destination(self) -> bool {
        matches!(
            self,
            Self::DstColor
                | Self::OneMinusDstColor
                | Self::DstAlpha
                | Self::OneMinusDstAlpha
                | Self::SrcAlphaSaturate
        )
    }
}

impl Default for BlendFactor {
    #[inline]
    fn default() -> Self {
        Self::Zero
    }
}

vulkan_enum! {
    BlendOp = BlendOp(i32);

    Add = ADD,
    Subtract = SUBTRACT,
    ReverseSubtract = REVERSE_SUBTRACT,
    Min = MIN,
    Max = MAX,
}

impl Default for BlendOp {
    #[inline]
    fn default() -> Self {
        Self::Add
    }
}

vulkan_enum! {
    CompareOp = CompareOp(i32);

    Never = NEVER,
    Less = LESS,
    Equal = EQUAL,
    LessOrEqual = LESS_OR_EQUAL,
    Greater = GREATER,
    NotEqual = NOT_EQUAL,
    GreaterOrEqual = GREATER_OR_EQUAL,
    Always = ALWAYS,
}

impl Default for CompareOp {
    #[inline]
    fn default() -> Self {
        Self::Always
    }
}

vulkan_enum! {
    StencilOp = StencilOp(i32);

    Keep = KEEP,
    Zero = ZERO,
    Replace = REPLACE,
    IncrementAndClamp = INCREMENT_AND_CLAMP,
    DecrementAndClamp = DECREMENT_AND_CLAMP,
    Invert = INVERT,
    IncrementAndWrap = INCREMENT_AND_WRAP,
    DecrementAndWrap = DECREMENT_AND_WRAP,
}

impl Default for StencilOp {
    #[inline]
    fn default() -> Self {
        Self::Keep
    }
}

vulkan_enum! {
    /// Which faces are discarded.
    CullMode = CullModeFlags(u32);

    None = NONE,
    Front = FRONT,
    Back = BACK,
    FrontAndBack = FRONT_AND_BACK,
}

impl Default for CullMode {
    #[inline]
    fn default() -> Self {
        Self::None
    }
}

vulkan_enum! {
    FrontFace = FrontFace(i32);

    CounterClockwise = COUNTER_CLOCKWISE,
    Clockwise = CLOCKWISE,
}

impl Default for FrontFace {
    #[inline]
    fn default() -> Self {
        Self::CounterClockwise
    }
}

vulkan_enum! {
    PolygonMode = PolygonMode(i32);

    Fill = FILL,
    Line = LINE,
    Point = POINT,
}

impl Default for PolygonMode {
    #[inline]
    fn default() -> Self {
        Self::Fill
    }
}

vulkan_enum! {
    LogicOp = LogicOp(i32);

    Clear = CLEAR,
    And = AND,
    AndReverse = AND_REVERSE,
    Copy = COPY,
    AndInverted = AND_INVERTED,
    Noop = NO_OP,
    Xor = XOR,
    Or = OR,
    Nor = NOR,
    Equivalent = EQUIVALENT,
    Invert = INVERT,
    OrReverse = OR_REVERSE,
    CopyInverted = COPY_INVERTED,
    OrInverted = OR_INVERTED,
    Nand = NAND,
    Set = SET,
}

impl Default for LogicOp {
    #[inline]
    fn default() -> Self {
        Self::Copy
    }
}

vulkan_enum! {
    PrimitiveTopology = PrimitiveTopology(i32);

    PointList = POINT_LIST,
    LineList = LINE_LIST,
    LineStrip = LINE_STRIP,
    TriangleList = TRIANGLE_LIST,
    TriangleStrip = TRIANGLE_STRIP,
    TriangleFan = TRIANGLE_FAN,
    LineListWithAdjacency = LINE_LIST_WITH_ADJACENCY,
    LineStripWithAdjacency = LINE_STRIP_WITH_ADJACENCY,
    TriangleListWithAdjacency = TRIANGLE_LIST_WITH_ADJACENCY,
    TriangleStripWithAdjacency = TRIANGLE_STRIP_WITH_ADJACENCY,
    PatchList = PATCH_LIST,
}

impl PrimitiveTopology {
    /// Returns whether the topology draws lines.
    #[inline]
    pub fn is_line(self) -> bool {
        matches!(
            self,
            Self::LineList
                | Self::LineStrip
                | Self::LineListWithAdjacency
                | Self::LineStripWithAdjacency
        )
    }
}

impl Default for PrimitiveTopology {
    #[inline]
    fn default() -> Self {
        Self::TriangleList
    }
}

vulkan_enum! {
    ProvokingVertexMode = ProvokingVertexModeEXT(i32);

    FirstVertex = FIRST_VERTEX,
    LastVertex = LAST_VERTEX,
}

impl Default for ProvokingVertexMode {
    #[inline]
    fn default() -> Self {
        Self::FirstVertex
    }
}

vulkan_enum! {
    /// The rasterization mode to use for lines.
    LineRasterizationMode = LineRasterizationModeEXT(i32);

    Default = DEFAULT,
    Rectangular = RECTANGULAR,
    Bresenham = BRESENHAM,
    RectangularSmooth = RECTANGULAR_SMOOTH,
}

impl Default for LineRasterizationMode {
    #[inline]
    fn default() -> Self {
        Self::Default
    }
}

vulkan_enum! {
    ConservativeRasterizationMode = ConservativeRasterizationModeEXT(i32);

    Disabled = DISABLED,
    Overestimate = OVERESTIMATE,
    Underestimate = UNDERESTIMATE,
}

impl Default for ConservativeRasterizationMode {
    #[inline]
    fn default() -> Self {
        Self::Disabled
    }
}

vulkan_enum! {
    TessellationDomainOrigin = TessellationDomainOrigin(i32);

    UpperLeft = UPPER_LEFT,
    LowerLeft = LOWER_LEFT,
}

impl Default for TessellationDomainOrigin {
    #[inline]
    fn default() -> Self {
        Self::UpperLeft
    }
}

vulkan_enum! {
    IndexType = IndexType(i32);

    U8 = UINT8_EXT,
    U16 = UINT16,
    U32 = UINT32,
}

impl IndexType {
    /// Returns the size of one index in bytes.
    #[inline]
    pub fn size(self) -> u32 {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Returns the primitive-restart index, which is the maximum value of the type.
    #[inline]
    pub fn restart_index(self) -> u32 {
        match self {
            Self::U8 => 0xff,
            Self::U16 => 0xffff,
            Self::U32 => 0xffff_ffff,
        }
    }
}

vulkan_enum! {
    Filter = Filter(i32);

    Nearest = NEAREST,
    Linear = LINEAR,
}

vulkan_enum! {
    SamplerMipmapMode = SamplerMipmapMode(i32);

    Nearest = NEAREST,
    Linear = LINEAR,
}

vulkan_enum! {
    SamplerAddressMode = SamplerAddressMode(i32);

    Repeat = REPEAT,
    MirroredRepeat = MIRRORED_REPEAT,
    ClampToEdge = CLAMP_TO_EDGE,
    ClampToBorder = CLAMP_TO_BORDER,
    MirrorClampToEdge = MIRROR_CLAMP_TO_EDGE,
}

vulkan_enum! {
    VertexInputRate = VertexInputRate(i32);

    Vertex = VERTEX,
    Instance = INSTANCE,
}

impl Default for VertexInputRate {
    #[inline]
    fn default() -> Self {
        Self::Vertex
    }
}

vulkan_enum! {
    /// How two fragment shading rates are combined.
    FragmentShadingRateCombinerOp = FragmentShadingRateCombinerOpKHR(i32);

    Keep = KEEP,
    Replace = REPLACE,
    Min = MIN,
    Max = MAX,
    Mul = MUL,
}

impl Default for FragmentShadingRateCombinerOp {
    #[inline]
    fn default() -> Self {
        Self::Keep
    }
}

vulkan_bitflags! {
    /// The color channels written by a blend attachment.
    ColorComponents = ColorComponentFlags(u32);

    R = R,
    G = G,
    B = B,
    A = A,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_index_per_type() {
        assert_eq!(IndexType::U8.restart_index(), 0xff);
        assert_eq!(IndexType::U16.restart_index(), 0xffff);
        assert_eq!(IndexType::U32.restart_index(), u32::MAX);
        assert_eq!(IndexType::U16.size(), 2);
    }

    #[test]
    fn conversions_round_trip_through_ash() {
        let op: ash::vk::BlendOp = BlendOp::Max.into();
        assert!(op == ash::vk::BlendOp::MAX);
        assert_eq!(CullMode::try_from(ash::vk::CullModeFlags::BACK), Ok(CullMode::Back));
        assert!(PolygonMode::try_from(ash::vk::PolygonMode::FILL_RECTANGLE_NV).is_err());
    }

    #[test]
    fn factor_classes() {
        assert!(BlendFactor::Src1Alpha.is_dual_source());
        assert!(!BlendFactor::SrcAlpha.is_dual_source());
        assert!(BlendFactor::OneMinusDstColor.reads_destination());
        assert!(PrimitiveTopology::LineStrip.is_line());
    }
}
