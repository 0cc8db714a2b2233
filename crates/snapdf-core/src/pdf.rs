//! Image-to-PDF encoding.
//!
//! Each input image becomes one page whose size matches the image at 96 DPI,
//! with the image drawn over the whole page. JPEG files are embedded as-is
//! (`DCTDecode`), everything else is decoded and stored as 8-bit gray or RGB
//! samples, Flate-compressed.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ColorType, ImageDecoder, ImageFormat, ImageReader};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};

/// Pixel density assumed for images that carry no physical size.
pub const DEFAULT_DPI: f32 = 96.0;

const POINTS_PER_INCH: f32 = 72.0;
const IMAGE_RESOURCE_NAME: &str = "Im0";

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("no images to encode")]
    NoImages,
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write pdf: {0}")]
    Write(String),
}

/// Turns an ordered list of image files into a single PDF byte stream.
pub trait PdfEncoder: Send + Sync + 'static {
    /// # Errors
    /// Fails if the list is empty or any input is unreadable or malformed.
    fn encode(&self, images: &[PathBuf]) -> Result<Vec<u8>, PdfError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ImagePdfEncoder {
    dpi: f32,
}

impl Default for ImagePdfEncoder {
    fn default() -> Self {
        Self { dpi: DEFAULT_DPI }
    }
}

impl ImagePdfEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the pixel density used to size pages. Non-positive values
    /// fall back to [`DEFAULT_DPI`].
    #[must_use]
    pub fn with_dpi(mut self, dpi: f32) -> Self {
        self.dpi = if dpi > 0.0 { dpi } else { DEFAULT_DPI };
        self
    }

    fn points(&self, pixels: u32) -> f32 {
        pixels as f32 * POINTS_PER_INCH / self.dpi
    }

    fn add_page(
        &self,
        doc: &mut Document,
        pages_id: ObjectId,
        image: PageImage,
    ) -> Result<ObjectId, PdfError> {
        let width = self.points(image.width);
        let height = self.points(image.height);

        let mut image_dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(image.width),
            "Height" => i64::from(image.height),
            "ColorSpace" => image.color_space,
            "BitsPerComponent" => 8_i64,
        };
        let image_stream = match image.filter {
            Some(filter) => {
                image_dict.set("Filter", filter);
                Stream::new(image_dict, image.data).with_compression(false)
            }
            None => Stream::new(image_dict, image.data),
        };
        let image_id = doc.add_object(image_stream);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(width),
                        Object::Real(0.0),
                        Object::Real(0.0),
                        Object::Real(height),
                        Object::Real(0.0),
                        Object::Real(0.0),
                    ],
                ),
                Operation::new(
                    "Do",
                    vec![Object::Name(IMAGE_RESOURCE_NAME.as_bytes().to_vec())],
                ),
                Operation::new("Q", vec![]),
            ],
        };
        let content_bytes = content
            .encode()
            .map_err(|err| PdfError::Write(err.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content_bytes));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Real(0.0),
                Object::Real(0.0),
                Object::Real(width),
                Object::Real(height),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    IMAGE_RESOURCE_NAME => image_id,
                },
            },
        });
        Ok(page_id)
    }
}

impl PdfEncoder for ImagePdfEncoder {
    fn encode(&self, images: &[PathBuf]) -> Result<Vec<u8>, PdfError> {
        if images.is_empty() {
            return Err(PdfError::NoImages);
        }

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::with_capacity(images.len());
        for path in images {
            let image = load_page_image(path)?;
            let page_id = self.add_page(&mut doc, pages_id, image)?;
            kids.push(Object::Reference(page_id));
        }

        let count = i64::try_from(kids.len()).unwrap_or(i64::MAX);
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.compress();

        let mut out = Vec::new();
        doc.save_to(&mut out)
            .map_err(|err| PdfError::Write(err.to_string()))?;
        Ok(out)
    }
}

/// Pixel data ready to be embedded as an image XObject.
struct PageImage {
    width: u32,
    height: u32,
    color_space: &'static str,
    filter: Option<&'static str>,
    data: Vec<u8>,
}

fn load_page_image(path: &Path) -> Result<PageImage, PdfError> {
    let bytes = fs::read(path).map_err(|source| PdfError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let decode_err = |source| PdfError::Decode {
        path: path.to_path_buf(),
        source,
    };

    if let Some((width, height, color_space)) = jpeg_passthrough(&bytes).map_err(decode_err)? {
        return Ok(PageImage {
            width,
            height,
            color_space,
            filter: Some("DCTDecode"),
            data: bytes,
        });
    }

    let decoded = image::load_from_memory(&bytes).map_err(decode_err)?;
    let (width, height) = (decoded.width(), decoded.height());
    let (color_space, data) = if decoded.color().has_color() {
        ("DeviceRGB", decoded.to_rgb8().into_raw())
    } else {
        ("DeviceGray", decoded.to_luma8().into_raw())
    };

    Ok(PageImage {
        width,
        height,
        color_space,
        filter: None,
        data,
    })
}

/// Returns dimensions and color space for JPEGs that can be embedded without
/// re-encoding. `None` means the image has to be decoded.
fn jpeg_passthrough(bytes: &[u8]) -> image::ImageResult<Option<(u32, u32, &'static str)>> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    if reader.format() != Some(ImageFormat::Jpeg) {
        return Ok(None);
    }

    let decoder = reader.into_decoder()?;
    let (width, height) = decoder.dimensions();
    let color_space = match decoder.color_type() {
        ColorType::L8 => "DeviceGray",
        ColorType::Rgb8 => "DeviceRGB",
        _ => return Ok(None),
    };
    Ok(Some((width, height, color_space)))
}
