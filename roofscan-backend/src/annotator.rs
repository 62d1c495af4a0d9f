use crate::merge::MergedDamage;
use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use damage_detector::{ImageInput, Severity};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Outline thickness in pixels
pub const BOX_LINE_WIDTH: u32 = 3;
const ANNOTATED_JPEG_QUALITY: u8 = 90;
const LABEL_PADDING: i32 = 4;
const MIN_FONT_SIZE: u32 = 12;

/// Searched after `ANNOTATION_FONT`
const FONT_CANDIDATES: [&str; 3] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/System/Library/Fonts/Helvetica.ttc",
];

pub fn severity_color(severity: Severity) -> Rgb<u8> {
    match severity {
        Severity::Minor => Rgb([255, 255, 0]),
        Severity::Moderate => Rgb([255, 165, 0]),
        Severity::Severe => Rgb([255, 0, 0]),
    }
}

/// Label font, loaded once. `None` when no usable font file exists, in which
/// case labels are drawn as bare background bars.
pub fn label_font() -> Option<&'static FontVec> {
    static FONT: OnceLock<Option<FontVec>> = OnceLock::new();
    FONT.get_or_init(load_font).as_ref()
}

fn load_font() -> Option<FontVec> {
    let configured = std::env::var("ANNOTATION_FONT").ok();
    let candidates = configured
        .iter()
        .map(String::as_str)
        .chain(FONT_CANDIDATES);

    for path in candidates {
        let Ok(bytes) = std::fs::read(path) else {
            continue;
        };
        match FontVec::try_from_vec_and_index(bytes, 0) {
            Ok(font) => {
                debug!("Annotation font loaded from {}", path);
                return Some(font);
            }
            Err(e) => warn!("Unusable annotation font {}: {}", path, e),
        }
    }

    warn!("No annotation font found; damage labels will have no text");
    None
}

/// `Hail Damage - Severe (87%)`; the confidence part is left out at zero
pub fn label_text(damage: &MergedDamage) -> String {
    let severity = damage.severity.as_str();
    let mut chars = severity.chars();
    let severity = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };

    let mut label = format!("{} - {}", damage.damage_type.label(), severity);
    if damage.confidence > 0.0 {
        label.push_str(&format!(" ({:.0}%)", damage.confidence * 100.0));
    }
    label
}

/// Label size scales with the image so it stays legible on large photos
pub fn font_size(width: u32, height: u32) -> u32 {
    (width.min(height) / 40).max(MIN_FONT_SIZE)
}

/// Draw one severity-coloured outline per damage, growing outward from the
/// box, with a white-on-black label above it
pub fn draw_damages(canvas: &mut RgbImage, damages: &[MergedDamage], font: Option<&FontVec>) {
    let (width, height) = canvas.dimensions();
    let size = font_size(width, height);

    for damage in damages {
        let (x1, y1, x2, y2) = damage.bbox.to_pixels(width, height);
        let color = severity_color(damage.severity);
        let box_width = x2.saturating_sub(x1).max(1);
        let box_height = y2.saturating_sub(y1).max(1);

        for i in 0..BOX_LINE_WIDTH {
            let rect = Rect::at(x1 as i32 - i as i32, y1 as i32 - i as i32)
                .of_size(box_width + 2 * i, box_height + 2 * i);
            draw_hollow_rect_mut(canvas, rect, color);
        }

        let label_y = y1.saturating_sub(size + 12) as i32;
        draw_label(canvas, &label_text(damage), x1 as i32, label_y, size, font);
    }
}

fn draw_label(
    canvas: &mut RgbImage,
    text: &str,
    x: i32,
    y: i32,
    size: u32,
    font: Option<&FontVec>,
) {
    let scale = PxScale::from(size as f32);
    let (text_width, text_height) = match font {
        Some(font) => text_size(scale, font, text),
        // rough advance for a proportional sans face
        None => (text.chars().count() as u32 * size / 2, size),
    };

    let background = Rect::at(x - LABEL_PADDING, y - LABEL_PADDING).of_size(
        text_width.max(1) + 2 * LABEL_PADDING as u32,
        text_height.max(1) + 2 * LABEL_PADDING as u32,
    );
    draw_filled_rect_mut(canvas, background, Rgb([0, 0, 0]));

    if let Some(font) = font {
        draw_text_mut(canvas, Rgb([255, 255, 255]), x, y, scale, font, text);
    }
}

/// Annotated copy of `image` as JPEG bytes
pub fn annotate(image: &ImageInput, damages: &[MergedDamage]) -> Result<Vec<u8>> {
    let mut canvas = image::load_from_memory(image.bytes())
        .context("Failed to decode image for annotation")?
        .to_rgb8();

    draw_damages(&mut canvas, damages, label_font());

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, ANNOTATED_JPEG_QUALITY)
        .encode_image(&canvas)
        .context("Failed to encode annotated image")?;
    Ok(buffer)
}

/// Annotated copy of `image` as a `data:image/jpeg;base64,` URL
pub fn annotate_to_data_url(image: &ImageInput, damages: &[MergedDamage]) -> Result<String> {
    let jpeg = annotate(image, damages)?;
    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg)))
}
