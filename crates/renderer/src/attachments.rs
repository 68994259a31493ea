//! Attachment collections: the images one render stage writes.
//!
//! [`AttachmentShape`] is the closed set of layouts a stage can render into.
//! It is pure data, so formats and counts can be checked without a device.
//! [`AttachmentCollection`] allocates the images for a shape at an extent.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use penumbra_rhi::{RhiError, RhiResult};
use penumbra_rhi::device::Device;
use penumbra_rhi::image::{Image, ImageDesc};

/// Format of every HDR intermediate.
pub const HDR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// Format of every depth attachment.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

const GBUFFER_FORMATS: [vk::Format; 4] = [
    // albedo
    vk::Format::R8G8B8A8_UNORM,
    // normal
    HDR_FORMAT,
    // metallic, roughness
    vk::Format::R8G8B8A8_UNORM,
    // position; alpha is the coverage mask
    HDR_FORMAT,
];

/// Layout of a stage's outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttachmentShape {
    /// One HDR color target.
    SingleColor,
    /// Albedo, normal, material and position, plus depth.
    GBuffer,
    /// Lit color and bright-pass color, plus depth.
    Composition,
    /// One HDR color target of a blur pass.
    Bloom,
    DepthOnly,
    /// Six-layer depth cubemap, rendered in one layered pass.
    DepthCube,
    /// One color view owned elsewhere: a swapchain image or a face of a
    /// pre-filtered cubemap.
    Surface,
}

impl AttachmentShape {
    pub const ALL: [AttachmentShape; 7] = [
        AttachmentShape::SingleColor,
        AttachmentShape::GBuffer,
        AttachmentShape::Composition,
        AttachmentShape::Bloom,
        AttachmentShape::DepthOnly,
        AttachmentShape::DepthCube,
        AttachmentShape::Surface,
    ];

    /// Color formats in attachment order. `surface_format` is only used by
    /// [`AttachmentShape::Surface`].
    pub fn color_formats(self, surface_format: vk::Format) -> Vec<vk::Format> {
        match self {
            AttachmentShape::SingleColor | AttachmentShape::Bloom => vec![HDR_FORMAT],
            AttachmentShape::GBuffer => GBUFFER_FORMATS.to_vec(),
            AttachmentShape::Composition => vec![HDR_FORMAT, HDR_FORMAT],
            AttachmentShape::DepthOnly | AttachmentShape::DepthCube => Vec::new(),
            AttachmentShape::Surface => vec![surface_format],
        }
    }

    pub fn depth_format(self) -> Option<vk::Format> {
        match self {
            AttachmentShape::GBuffer
            | AttachmentShape::Composition
            | AttachmentShape::DepthOnly
            | AttachmentShape::DepthCube => Some(DEPTH_FORMAT),
            AttachmentShape::SingleColor | AttachmentShape::Bloom | AttachmentShape::Surface => {
                None
            }
        }
    }

    /// Framebuffer layers.
    pub fn layers(self) -> u32 {
        match self {
            AttachmentShape::DepthCube => 6,
            _ => 1,
        }
    }

    pub fn attachment_count(self) -> usize {
        let colors = match self {
            AttachmentShape::GBuffer => 4,
            AttachmentShape::Composition => 2,
            AttachmentShape::DepthOnly | AttachmentShape::DepthCube => 0,
            AttachmentShape::SingleColor | AttachmentShape::Bloom | AttachmentShape::Surface => 1,
        };
        colors + usize::from(self.depth_format().is_some())
    }

    /// All formats in framebuffer order: colors, then depth.
    pub fn formats(self, surface_format: vk::Format) -> Vec<vk::Format> {
        let mut formats = self.color_formats(surface_format);
        formats.extend(self.depth_format());
        formats
    }

    /// Whether the collection allocates its own images.
    pub fn owns_images(self) -> bool {
        self != AttachmentShape::Surface
    }

    fn name(self) -> &'static str {
        match self {
            AttachmentShape::SingleColor => "single_color",
            AttachmentShape::GBuffer => "gbuffer",
            AttachmentShape::Composition => "composition",
            AttachmentShape::Bloom => "bloom",
            AttachmentShape::DepthOnly => "depth",
            AttachmentShape::DepthCube => "depth_cube",
            AttachmentShape::Surface => "surface",
        }
    }
}

/// Images written by one framebuffer of a render stage.
///
/// Owned images are destroyed with the collection, in creation order. A
/// [`AttachmentShape::Surface`] collection only records a view; the image
/// behind it belongs to the swapchain or to a cubemap elsewhere.
pub struct AttachmentCollection {
    shape: AttachmentShape,
    extent: vk::Extent2D,
    formats: Vec<vk::Format>,
    /// Views bound to the framebuffer, colors first.
    color_views: Vec<vk::ImageView>,
    depth_view: Option<vk::ImageView>,
    colors: Vec<Image>,
    depth: Option<Image>,
}

impl AttachmentCollection {
    /// Allocates every image of `shape` at `extent`.
    ///
    /// # Errors
    ///
    /// Returns an error for [`AttachmentShape::Surface`], which owns no
    /// images, or if any image allocation fails.
    pub fn new(device: &Arc<Device>, shape: AttachmentShape, extent: vk::Extent2D) -> RhiResult<Self> {
        if !shape.owns_images() {
            return Err(RhiError::ImageError(
                "surface attachments wrap an existing view; use AttachmentCollection::borrowed"
                    .to_string(),
            ));
        }

        let sampled = vk::ImageUsageFlags::SAMPLED;
        let colors = shape
            .color_formats(vk::Format::UNDEFINED)
            .into_iter()
            .map(|format| {
                Image::new(
                    device.clone(),
                    ImageDesc::new_2d(
                        shape.name(),
                        extent,
                        format,
                        vk::ImageUsageFlags::COLOR_ATTACHMENT | sampled,
                    ),
                )
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let mut depth = shape
            .depth_format()
            .map(|format| {
                let usage = vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | sampled;
                let desc = if shape == AttachmentShape::DepthCube {
                    ImageDesc::new_cube(shape.name(), extent.width, format, usage, 1)
                } else {
                    ImageDesc::new_2d(shape.name(), extent, format, usage)
                };
                Image::new(device.clone(), desc)
            })
            .transpose()?;

        let color_views = colors.iter().map(Image::view).collect();
        // A layered framebuffer needs an array view; the cube view is for sampling.
        let depth_view = match depth.as_mut() {
            Some(image) if shape == AttachmentShape::DepthCube => Some(image.array_view()?),
            Some(image) => Some(image.view()),
            None => None,
        };

        debug!(
            "Allocated {:?} attachments at {}x{}",
            shape, extent.width, extent.height
        );

        Ok(Self {
            shape,
            extent,
            formats: shape.formats(vk::Format::UNDEFINED),
            color_views,
            depth_view,
            colors,
            depth,
        })
    }

    /// Wraps a color view owned elsewhere.
    pub fn borrowed(view: vk::ImageView, format: vk::Format, extent: vk::Extent2D) -> Self {
        Self {
            shape: AttachmentShape::Surface,
            extent,
            formats: vec![format],
            color_views: vec![view],
            depth_view: None,
            colors: Vec::new(),
            depth: None,
        }
    }

    #[inline]
    pub fn shape(&self) -> AttachmentShape {
        self.shape
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Formats in framebuffer order.
    #[inline]
    pub fn formats(&self) -> &[vk::Format] {
        &self.formats
    }

    #[inline]
    pub fn color_views(&self) -> &[vk::ImageView] {
        &self.color_views
    }

    #[inline]
    pub fn depth_view(&self) -> Option<vk::ImageView> {
        self.depth_view
    }

    /// Views for a framebuffer: colors, then depth.
    pub fn framebuffer_views(&self) -> Vec<vk::ImageView> {
        let mut views = self.color_views.clone();
        views.extend(self.depth_view);
        views
    }

    /// View for sampling color attachment `index` in a later pass.
    pub fn sampled_color(&self, index: usize) -> Option<vk::ImageView> {
        self.color_views.get(index).copied()
    }

    /// View for sampling the depth attachment; `CUBE` for depth cubes.
    pub fn sampled_depth(&self) -> Option<vk::ImageView> {
        self.depth.as_ref().map(Image::view)
    }

    pub fn attachment_count(&self) -> usize {
        self.color_views.len() + usize::from(self.depth_view.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gbuffer_layout() {
        let shape = AttachmentShape::GBuffer;
        assert_eq!(shape.attachment_count(), 5);
        assert_eq!(
            shape.formats(vk::Format::B8G8R8A8_SRGB),
            vec![
                vk::Format::R8G8B8A8_UNORM,
                vk::Format::R16G16B16A16_SFLOAT,
                vk::Format::R8G8B8A8_UNORM,
                vk::Format::R16G16B16A16_SFLOAT,
                vk::Format::D32_SFLOAT,
            ]
        );
    }

    #[test]
    fn test_counts_match_formats() {
        for shape in AttachmentShape::ALL {
            assert_eq!(
                shape.attachment_count(),
                shape.formats(vk::Format::B8G8R8A8_SRGB).len(),
                "{:?}",
                shape
            );
        }
    }

    #[test]
    fn test_only_surface_follows_surface_format() {
        for shape in AttachmentShape::ALL {
            let a = shape.formats(vk::Format::B8G8R8A8_SRGB);
            let b = shape.formats(vk::Format::R8G8B8A8_UNORM);
            assert_eq!(a == b, shape != AttachmentShape::Surface, "{:?}", shape);
        }
    }

    #[test]
    fn test_depth_cube_is_layered() {
        assert_eq!(AttachmentShape::DepthCube.layers(), 6);
        assert!(AttachmentShape::DepthCube.color_formats(vk::Format::UNDEFINED).is_empty());
        assert_eq!(AttachmentShape::DepthOnly.layers(), 1);
    }

    #[test]
    fn test_borrowed_collection_has_one_color() {
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let borrowed =
            AttachmentCollection::borrowed(vk::ImageView::null(), vk::Format::B8G8R8A8_SRGB, extent);
        assert_eq!(borrowed.shape(), AttachmentShape::Surface);
        assert_eq!(borrowed.attachment_count(), 1);
        assert_eq!(borrowed.framebuffer_views().len(), 1);
        assert!(borrowed.sampled_depth().is_none());
        assert_eq!(borrowed.extent(), extent);
    }
}
