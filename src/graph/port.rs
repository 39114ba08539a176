//! Port type registry and port definitions.
//!
//! A static table of every data type that can flow through a port, with
//! display metadata and pairwise compatibility rules. Lookups are pure; the
//! registry never errors. Unknown type names degrade to [`PortDataType::Any`],
//! the universal type, which connects to everything in both directions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Data types that a port can carry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum PortDataType {
    /// 32-bit float RGBA image, the primary working format
    F32Bmp,
    /// Statistics page image, interchangeable with F32Bmp
    F32Page,
    /// Standard encoded image (PNG, JPG, ...)
    Img,
    /// 16-bit TIFF image (deprecated)
    Tif16,
    /// 8-bit TIFF image (reserved)
    Tif8,
    /// Convolution kernel data
    Kernel,
    /// Constant value
    Constant,
    /// Mask data
    Mask,
    /// Frequency-domain image data
    SpectrumF,
    /// Generic image type kept for legacy script compatibility
    Image,
    /// Array data
    Array,
    /// Opaque object data
    Object,
    /// 3D lookup table cube
    Cube3dLut,
    /// 1D lookup table curve
    OneDLut,
    /// Color transfer model data
    ColorTransferModel,
    /// Red channel
    ChannelR,
    /// Green channel
    ChannelG,
    /// Blue channel
    ChannelB,
    /// Alpha channel
    ChannelA,
    /// Numeric value
    Number,
    /// String value
    String,
    /// Boolean value
    Boolean,
    /// Color value
    Color,
    /// Vector value
    Vector,
    /// Generic collection
    Set,
    /// Collection of F32Bmp images
    F32BmpSet,
    /// Universal type, compatible with everything
    Any,
}

/// Display category of a port type.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PortCategory {
    Image,
    Data,
    ColorManagement,
    Channel,
    Basic,
    General,
}

/// Static metadata for one port data type.
pub struct PortTypeInfo {
    pub data_type: PortDataType,
    pub name: &'static str,
    pub description: &'static str,
    pub hex_color: &'static str,
    pub category: PortCategory,
    pub deprecated: bool,
    pub compatible: &'static [PortDataType],
}

use PortDataType::*;

// Shared compatibility groups. Image formats interconvert freely; channels
// interconvert with each other; everything else only matches itself (plus Any,
// which is handled in `are_compatible`).
const IMAGE_COMPAT: &[PortDataType] = &[F32Bmp, F32Page, Img, Tif16, Tif8];
const IMAGE_LEGACY_COMPAT: &[PortDataType] = &[Image, F32Bmp, F32Page, Img, Tif16, Tif8];
const CHANNEL_COMPAT: &[PortDataType] = &[ChannelR, ChannelG, ChannelB, ChannelA];

impl PortDataType {
    /// Every known port data type.
    pub const ALL: [PortDataType; 27] = [
        F32Bmp,
        F32Page,
        Img,
        Tif16,
        Tif8,
        Kernel,
        Constant,
        Mask,
        SpectrumF,
        Image,
        Array,
        Object,
        Cube3dLut,
        OneDLut,
        ColorTransferModel,
        ChannelR,
        ChannelG,
        ChannelB,
        ChannelA,
        Number,
        String,
        Boolean,
        Color,
        Vector,
        Set,
        F32BmpSet,
        Any,
    ];

    /// Static metadata for this type.
    pub fn info(self) -> &'static PortTypeInfo {
        match self {
            F32Bmp => &PortTypeInfo {
                data_type: F32Bmp,
                name: "F32BMP",
                description: "32-bit float RGBA image (primary format)",
                hex_color: "#F08080",
                category: PortCategory::Image,
                deprecated: false,
                compatible: IMAGE_COMPAT,
            },
            F32Page => &PortTypeInfo {
                data_type: F32Page,
                name: "F32Page",
                description: "Statistics page image compatible with F32BMP",
                hex_color: "#87CEEB",
                category: PortCategory::Image,
                deprecated: false,
                compatible: IMAGE_COMPAT,
            },
            Img => &PortTypeInfo {
                data_type: Img,
                name: "IMG",
                description: "Standard encoded image (PNG, JPG, ...)",
                hex_color: "#8A2BE2",
                category: PortCategory::Image,
                deprecated: false,
                compatible: IMAGE_COMPAT,
            },
            Tif16 => &PortTypeInfo {
                data_type: Tif16,
                name: "TIF16",
                description: "16-bit TIFF image",
                hex_color: "#0000FF",
                category: PortCategory::Image,
                deprecated: true,
                compatible: IMAGE_COMPAT,
            },
            Tif8 => &PortTypeInfo {
                data_type: Tif8,
                name: "TIF8",
                description: "8-bit TIFF image (reserved)",
                hex_color: "#87CEFA",
                category: PortCategory::Image,
                deprecated: false,
                compatible: IMAGE_COMPAT,
            },
            Kernel => &PortTypeInfo {
                data_type: Kernel,
                name: "Kernel",
                description: "Convolution kernel data",
                hex_color: "#FFFF00",
                category: PortCategory::Data,
                deprecated: false,
                compatible: &[Kernel],
            },
            Constant => &PortTypeInfo {
                data_type: Constant,
                name: "Constant",
                description: "Constant data",
                hex_color: "#228B22",
                category: PortCategory::Data,
                deprecated: false,
                compatible: &[Constant, Number],
            },
            Mask => &PortTypeInfo {
                data_type: Mask,
                name: "Mask",
                description: "Mask data",
                hex_color: "#F0E68C",
                category: PortCategory::Data,
                deprecated: false,
                compatible: &[Mask],
            },
            SpectrumF => &PortTypeInfo {
                data_type: SpectrumF,
                name: "Spectrumf",
                description: "Frequency-domain image data",
                hex_color: "#FF6A6A",
                category: PortCategory::Data,
                deprecated: false,
                compatible: &[SpectrumF],
            },
            Image => &PortTypeInfo {
                data_type: Image,
                name: "Image",
                description: "Generic image type (legacy script compatibility)",
                hex_color: "#FF6464",
                category: PortCategory::Image,
                deprecated: false,
                compatible: IMAGE_LEGACY_COMPAT,
            },
            Array => &PortTypeInfo {
                data_type: Array,
                name: "Array",
                description: "Array data",
                hex_color: "#64FFFF",
                category: PortCategory::Data,
                deprecated: false,
                compatible: &[Array],
            },
            Object => &PortTypeInfo {
                data_type: Object,
                name: "Object",
                description: "Opaque object data",
                hex_color: "#C8C8C8",
                category: PortCategory::Data,
                deprecated: false,
                compatible: &[Object],
            },
            Cube3dLut => &PortTypeInfo {
                data_type: Cube3dLut,
                name: "Cube3DLut",
                description: "3D lookup table cube data",
                hex_color: "#9932CC",
                category: PortCategory::ColorManagement,
                deprecated: false,
                compatible: &[Cube3dLut],
            },
            OneDLut => &PortTypeInfo {
                data_type: OneDLut,
                name: "OneDLut",
                description: "1D lookup table curve data",
                hex_color: "#FF8C00",
                category: PortCategory::ColorManagement,
                deprecated: false,
                compatible: &[OneDLut],
            },
            ColorTransferModel => &PortTypeInfo {
                data_type: ColorTransferModel,
                name: "ColorTransferModel",
                description: "Color transfer model data",
                hex_color: "#DC143C",
                category: PortCategory::ColorManagement,
                deprecated: false,
                compatible: &[ColorTransferModel],
            },
            ChannelR => &PortTypeInfo {
                data_type: ChannelR,
                name: "ChannelR",
                description: "Red channel",
                hex_color: "#FF0000",
                category: PortCategory::Channel,
                deprecated: false,
                compatible: CHANNEL_COMPAT,
            },
            ChannelG => &PortTypeInfo {
                data_type: ChannelG,
                name: "ChannelG",
                description: "Green channel",
                hex_color: "#00FF00",
                category: PortCategory::Channel,
                deprecated: false,
                compatible: CHANNEL_COMPAT,
            },
            ChannelB => &PortTypeInfo {
                data_type: ChannelB,
                name: "ChannelB",
                description: "Blue channel",
                hex_color: "#0000FF",
                category: PortCategory::Channel,
                deprecated: false,
                compatible: CHANNEL_COMPAT,
            },
            ChannelA => &PortTypeInfo {
                data_type: ChannelA,
                name: "ChannelA",
                description: "Alpha channel",
                hex_color: "#778899",
                category: PortCategory::Channel,
                deprecated: false,
                compatible: CHANNEL_COMPAT,
            },
            Number => &PortTypeInfo {
                data_type: Number,
                name: "Number",
                description: "Numeric value",
                hex_color: "#FFA500",
                category: PortCategory::Basic,
                deprecated: false,
                compatible: &[Number, Constant],
            },
            String => &PortTypeInfo {
                data_type: String,
                name: "String",
                description: "String value",
                hex_color: "#DDA0DD",
                category: PortCategory::Basic,
                deprecated: false,
                compatible: &[String],
            },
            Boolean => &PortTypeInfo {
                data_type: Boolean,
                name: "Boolean",
                description: "Boolean value",
                hex_color: "#20B2AA",
                category: PortCategory::Basic,
                deprecated: false,
                compatible: &[Boolean],
            },
            Color => &PortTypeInfo {
                data_type: Color,
                name: "Color",
                description: "Color value",
                hex_color: "#FF69B4",
                category: PortCategory::Basic,
                deprecated: false,
                compatible: &[Color],
            },
            Vector => &PortTypeInfo {
                data_type: Vector,
                name: "Vector",
                description: "Vector value",
                hex_color: "#8FBC8F",
                category: PortCategory::Basic,
                deprecated: false,
                compatible: &[Vector],
            },
            Set => &PortTypeInfo {
                data_type: Set,
                name: "Set",
                description: "Generic collection",
                hex_color: "#DDA0DD",
                category: PortCategory::Basic,
                deprecated: false,
                compatible: &[Set, F32BmpSet],
            },
            F32BmpSet => &PortTypeInfo {
                data_type: F32BmpSet,
                name: "F32bmpSet",
                description: "Collection of F32BMP images",
                hex_color: "#D02090",
                category: PortCategory::Basic,
                deprecated: false,
                compatible: &[F32BmpSet],
            },
            Any => &PortTypeInfo {
                data_type: Any,
                name: "Any",
                description: "Universal type",
                hex_color: "#9B9B9B",
                category: PortCategory::General,
                deprecated: false,
                compatible: &Self::ALL,
            },
        }
    }

    /// Display name of this type.
    pub fn display_name(self) -> &'static str {
        self.info().name
    }

    /// Hex color used to render ports of this type.
    pub fn hex_color(self) -> &'static str {
        self.info().hex_color
    }

    pub fn is_deprecated(self) -> bool {
        self.info().deprecated
    }

    /// Resolve a case-insensitive type name or alias to a canonical type.
    ///
    /// Unknown or empty names resolve to [`PortDataType::Any`] rather than
    /// erroring. Note that `"image"` is an alias for the primary working
    /// format `F32Bmp`, shadowing the legacy `Image` type's own name.
    pub fn parse(name: &str) -> PortDataType {
        match name.trim().to_ascii_lowercase().as_str() {
            "f32bmp" => F32Bmp,
            "image" => F32Bmp,
            "f32page" | "page" => F32Page,
            "img" => Img,
            "tif16" => Tif16,
            "tif8" => Tif8,
            "kernel" => Kernel,
            "constant" => Constant,
            "mask" => Mask,
            "spectrumf" => SpectrumF,
            "array" => Array,
            "object" => Object,
            "cube3dlut" | "3dlut" => Cube3dLut,
            "onedlut" | "1dlut" => OneDLut,
            "colortransfermodel" | "ctm" => ColorTransferModel,
            "channelr" => ChannelR,
            "channelg" => ChannelG,
            "channelb" => ChannelB,
            "channela" => ChannelA,
            "number" => Number,
            "string" | "text" => String,
            "boolean" => Boolean,
            "color" => Color,
            "vector" => Vector,
            "set" => Set,
            "f32bmpset" => F32BmpSet,
            _ => Any,
        }
    }

    /// Whether a value produced on an output port of type `output` may feed
    /// an input port of type `input`.
    ///
    /// The universal type matches everything in both directions; identical
    /// types always match; otherwise the output type's compatibility list
    /// decides.
    pub fn are_compatible(output: PortDataType, input: PortDataType) -> bool {
        if output == Any || input == Any {
            return true;
        }
        if output == input {
            return true;
        }
        output.info().compatible.contains(&input)
    }
}

impl fmt::Display for PortDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A named, typed slot on a node or script descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub name: std::string::String,
    pub data_type: PortDataType,
    /// Whether additional ports of this type can be added at runtime.
    #[serde(default)]
    pub flexible: bool,
    #[serde(default)]
    pub description: std::string::String,
}

impl PortDefinition {
    pub fn new(name: impl Into<std::string::String>, data_type: PortDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            flexible: false,
            description: std::string::String::new(),
        }
    }

    pub fn flexible(mut self) -> Self {
        self.flexible = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<std::string::String>) -> Self {
        self.description = description.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_names() {
        assert_eq!(PortDataType::parse("f32bmp"), F32Bmp);
        assert_eq!(PortDataType::parse("F32BMP"), F32Bmp);
        assert_eq!(PortDataType::parse("ChannelG"), ChannelG);
        assert_eq!(PortDataType::parse("string"), PortDataType::String);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(PortDataType::parse("image"), F32Bmp);
        assert_eq!(PortDataType::parse("page"), F32Page);
        assert_eq!(PortDataType::parse("text"), PortDataType::String);
        assert_eq!(PortDataType::parse("3dlut"), Cube3dLut);
        assert_eq!(PortDataType::parse("ctm"), ColorTransferModel);
    }

    #[test]
    fn test_parse_unknown_falls_back_to_any() {
        assert_eq!(PortDataType::parse("totally-unknown-type"), Any);
        assert_eq!(PortDataType::parse(""), Any);
        assert_eq!(PortDataType::parse("   "), Any);
    }

    #[test]
    fn test_any_compatible_both_directions() {
        for ty in PortDataType::ALL {
            assert!(PortDataType::are_compatible(Any, ty));
            assert!(PortDataType::are_compatible(ty, Any));
        }
    }

    #[test]
    fn test_identical_types_compatible() {
        for ty in PortDataType::ALL {
            assert!(PortDataType::are_compatible(ty, ty));
        }
    }

    #[test]
    fn test_image_family_compatibility() {
        assert!(PortDataType::are_compatible(F32Bmp, F32Page));
        assert!(PortDataType::are_compatible(Tif16, Img));
        assert!(!PortDataType::are_compatible(F32Bmp, Mask));
    }

    #[test]
    fn test_channel_compatibility() {
        assert!(PortDataType::are_compatible(ChannelR, ChannelA));
        assert!(!PortDataType::are_compatible(ChannelR, Number));
    }

    #[test]
    fn test_constant_number_compatibility() {
        assert!(PortDataType::are_compatible(Constant, Number));
        assert!(PortDataType::are_compatible(Number, Constant));
    }

    #[test]
    fn test_deprecated_flag() {
        assert!(Tif16.is_deprecated());
        assert!(!F32Bmp.is_deprecated());
    }

    #[test]
    fn test_display_name_round_trip() {
        // Every type's display name parses back to itself, except the legacy
        // Image type whose name is shadowed by the "image" alias.
        for ty in PortDataType::ALL {
            if ty == Image {
                assert_eq!(PortDataType::parse(ty.display_name()), F32Bmp);
            } else {
                assert_eq!(PortDataType::parse(ty.display_name()), ty);
            }
        }
    }
}
