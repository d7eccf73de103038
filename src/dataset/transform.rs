//! Transform pipelines for shot frames.
//!
//! A [`Pipeline`] is an ordered list of [`ImageOp`] stages, each applied with
//! its own probability. Images travel through the pipeline as `Rgb32FImage`
//! with channels scaled to `[0, 1]`; after `Normalize` they hold standardized
//! values and `to_tensor_data` lays them out as CHW floats.
//!
//! # Presets
//!
//! - **Training**: random resized crop, flips and transpose, affine jitter,
//!   color jitter, normalization and two kinds of hole dropout
//! - **Validation**: center crop, resize, normalization (deterministic)

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, Rgb32FImage};
use rand::Rng;

/// ImageNet channel means
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A single image operation
#[derive(Debug, Clone, PartialEq)]
pub enum ImageOp {
    /// Crop a random area and aspect ratio, then resize to `size`×`size`
    RandomResizedCrop {
        size: u32,
        scale: (f32, f32),
        ratio: (f32, f32),
    },
    /// Swap rows and columns
    Transpose,
    HorizontalFlip,
    VerticalFlip,
    /// Random affine: shift (fraction of side), scale (±fraction), rotation (±degrees)
    ShiftScaleRotate {
        shift_limit: f32,
        scale_limit: f32,
        rotate_limit: f32,
    },
    /// Hue shift in degrees, saturation and value shifts on the `[0, 1]` scale
    HueSaturationValue {
        hue_shift_limit: f32,
        sat_shift_limit: f32,
        val_shift_limit: f32,
    },
    /// `x * (1 + contrast) + brightness`, both drawn from `±limit`
    RandomBrightnessContrast {
        brightness_limit: f32,
        contrast_limit: f32,
    },
    /// Per-channel standardization
    Normalize { mean: [f32; 3], std: [f32; 3] },
    /// Between `min_holes` and `max_holes` rectangles fully inside the image
    CoarseDropout {
        min_holes: usize,
        max_holes: usize,
        hole_height: u32,
        hole_width: u32,
        fill_value: f32,
    },
    /// Square holes centered on random pixels, clipped at the border
    Cutout {
        num_holes: usize,
        hole_size: u32,
        fill_value: f32,
    },
    /// Central `size`×`size` window, or as much of it as the image has
    CenterCrop { size: u32 },
    Resize { size: u32 },
}

impl ImageOp {
    /// Whether the operation draws random numbers
    pub fn is_random(&self) -> bool {
        !matches!(
            self,
            ImageOp::Transpose
                | ImageOp::HorizontalFlip
                | ImageOp::VerticalFlip
                | ImageOp::Normalize { .. }
                | ImageOp::CenterCrop { .. }
                | ImageOp::Resize { .. }
        )
    }

    /// Apply the operation to an image
    pub fn apply<R: Rng + ?Sized>(&self, img: Rgb32FImage, rng: &mut R) -> Rgb32FImage {
        match *self {
            ImageOp::RandomResizedCrop { size, scale, ratio } => {
                random_resized_crop(&img, size, scale, ratio, rng)
            }
            ImageOp::Transpose => transpose(&img),
            ImageOp::HorizontalFlip => imageops::flip_horizontal(&img),
            ImageOp::VerticalFlip => imageops::flip_vertical(&img),
            ImageOp::ShiftScaleRotate {
                shift_limit,
                scale_limit,
                rotate_limit,
            } => {
                let angle = rng.gen_range(-rotate_limit..=rotate_limit);
                let scale = 1.0 + rng.gen_range(-scale_limit..=scale_limit);
                let dx = rng.gen_range(-shift_limit..=shift_limit);
                let dy = rng.gen_range(-shift_limit..=shift_limit);
                shift_scale_rotate(&img, angle, scale, dx, dy)
            }
            ImageOp::HueSaturationValue {
                hue_shift_limit,
                sat_shift_limit,
                val_shift_limit,
            } => {
                let hue = rng.gen_range(-hue_shift_limit..=hue_shift_limit);
                let sat = rng.gen_range(-sat_shift_limit..=sat_shift_limit);
                let val = rng.gen_range(-val_shift_limit..=val_shift_limit);
                shift_hsv(img, hue, sat, val)
            }
            ImageOp::RandomBrightnessContrast {
                brightness_limit,
                contrast_limit,
            } => {
                let alpha = 1.0 + rng.gen_range(-contrast_limit..=contrast_limit);
                let beta = rng.gen_range(-brightness_limit..=brightness_limit);
                brightness_contrast(img, alpha, beta)
            }
            ImageOp::Normalize { mean, std } => normalize(img, mean, std),
            ImageOp::CoarseDropout {
                min_holes,
                max_holes,
                hole_height,
                hole_width,
                fill_value,
            } => coarse_dropout(img, min_holes, max_holes, hole_height, hole_width, fill_value, rng),
            ImageOp::Cutout {
                num_holes,
                hole_size,
                fill_value,
            } => cutout(img, num_holes, hole_size, fill_value, rng),
            ImageOp::CenterCrop { size } => center_crop(&img, size),
            ImageOp::Resize { size } => resize(&img, size),
        }
    }
}

/// An operation together with the probability of applying it
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub op: ImageOp,
    pub probability: f32,
}

impl Stage {
    pub fn always(op: ImageOp) -> Self {
        Self { op, probability: 1.0 }
    }

    pub fn sometimes(op: ImageOp, probability: f32) -> Self {
        Self { op, probability }
    }
}

/// Ordered sequence of stages, fixed once built
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Stochastic training pipeline producing `image_size`×`image_size` inputs
    pub fn train(image_size: u32) -> Self {
        Self::new(vec![
            Stage::always(ImageOp::RandomResizedCrop {
                size: image_size,
                scale: (0.08, 1.0),
                ratio: (3.0 / 4.0, 4.0 / 3.0),
            }),
            Stage::sometimes(ImageOp::Transpose, 0.5),
            Stage::sometimes(ImageOp::HorizontalFlip, 0.5),
            Stage::sometimes(ImageOp::VerticalFlip, 0.5),
            Stage::sometimes(
                ImageOp::ShiftScaleRotate {
                    shift_limit: 0.0625,
                    scale_limit: 0.1,
                    rotate_limit: 45.0,
                },
                0.5,
            ),
            Stage::sometimes(
                ImageOp::HueSaturationValue {
                    hue_shift_limit: 0.2,
                    sat_shift_limit: 0.2,
                    val_shift_limit: 0.2,
                },
                0.5,
            ),
            Stage::sometimes(
                ImageOp::RandomBrightnessContrast {
                    brightness_limit: 0.1,
                    contrast_limit: 0.1,
                },
                0.5,
            ),
            Stage::always(ImageOp::Normalize {
                mean: IMAGENET_MEAN,
                std: IMAGENET_STD,
            }),
            Stage::sometimes(
                ImageOp::CoarseDropout {
                    min_holes: 8,
                    max_holes: 8,
                    hole_height: 8,
                    hole_width: 8,
                    fill_value: 0.0,
                },
                0.5,
            ),
            Stage::sometimes(
                ImageOp::Cutout {
                    num_holes: 8,
                    hole_size: 8,
                    fill_value: 0.0,
                },
                0.5,
            ),
        ])
    }

    /// Deterministic validation pipeline producing `image_size`×`image_size` inputs
    pub fn validation(image_size: u32) -> Self {
        Self::new(vec![
            Stage::always(ImageOp::CenterCrop { size: image_size }),
            Stage::always(ImageOp::Resize { size: image_size }),
            Stage::always(ImageOp::Normalize {
                mean: IMAGENET_MEAN,
                std: IMAGENET_STD,
            }),
        ])
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// True when two runs over the same input always agree
    pub fn is_deterministic(&self) -> bool {
        self.stages
            .iter()
            .all(|s| s.probability >= 1.0 && !s.op.is_random())
    }

    /// Run every stage in order
    pub fn apply<R: Rng + ?Sized>(&self, img: Rgb32FImage, rng: &mut R) -> Rgb32FImage {
        let mut result = img;
        for stage in &self.stages {
            if stage.probability >= 1.0 || rng.gen::<f32>() < stage.probability {
                result = stage.op.apply(result, rng);
            }
        }
        result
    }

    /// Decode-to-tensor path: RGB float conversion, all stages, CHW layout
    pub fn process<R: Rng + ?Sized>(&self, img: &DynamicImage, rng: &mut R) -> Vec<f32> {
        let rgb = img.to_rgb32f();
        to_tensor_data(&self.apply(rgb, rng))
    }
}

/// Convert an image to CHW float data
pub fn to_tensor_data(img: &Rgb32FImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let mut data = Vec::with_capacity(3 * height as usize * width as usize);

    for c in 0..3 {
        for y in 0..height {
            for x in 0..width {
                data.push(img.get_pixel(x, y)[c]);
            }
        }
    }

    data
}

fn resize(img: &Rgb32FImage, size: u32) -> Rgb32FImage {
    if img.dimensions() == (size, size) {
        return img.clone();
    }
    imageops::resize(img, size, size, FilterType::Triangle)
}

fn crop(img: &Rgb32FImage, x: u32, y: u32, width: u32, height: u32) -> Rgb32FImage {
    imageops::crop_imm(img, x, y, width, height).to_image()
}

fn random_resized_crop<R: Rng + ?Sized>(
    img: &Rgb32FImage,
    size: u32,
    scale: (f32, f32),
    ratio: (f32, f32),
    rng: &mut R,
) -> Rgb32FImage {
    let (width, height) = img.dimensions();
    let area = (width * height) as f32;
    let log_ratio = (ratio.0.ln(), ratio.1.ln());

    for _ in 0..10 {
        let target_area = area * rng.gen_range(scale.0..=scale.1);
        let aspect = rng.gen_range(log_ratio.0..=log_ratio.1).exp();

        let w = (target_area * aspect).sqrt().round() as u32;
        let h = (target_area / aspect).sqrt().round() as u32;

        if w > 0 && h > 0 && w <= width && h <= height {
            let x = rng.gen_range(0..=width - w);
            let y = rng.gen_range(0..=height - h);
            return resize(&crop(img, x, y, w, h), size);
        }
    }

    // Fallback: largest central crop within the ratio bounds
    let in_ratio = width as f32 / height as f32;
    let (w, h) = if in_ratio < ratio.0 {
        (width, ((width as f32 / ratio.0).round() as u32).clamp(1, height))
    } else if in_ratio > ratio.1 {
        (((height as f32 * ratio.1).round() as u32).clamp(1, width), height)
    } else {
        (width, height)
    };
    let x = (width - w) / 2;
    let y = (height - h) / 2;
    resize(&crop(img, x, y, w, h), size)
}

fn center_crop(img: &Rgb32FImage, size: u32) -> Rgb32FImage {
    let (width, height) = img.dimensions();
    let w = size.min(width);
    let h = size.min(height);
    crop(img, (width - w) / 2, (height - h) / 2, w, h)
}

fn transpose(img: &Rgb32FImage) -> Rgb32FImage {
    let (width, height) = img.dimensions();
    let mut output = Rgb32FImage::new(height, width);
    for (x, y, pixel) in img.enumerate_pixels() {
        output.put_pixel(y, x, *pixel);
    }
    output
}

/// Reflect an out-of-range coordinate back inside `0..len` without repeating the edge
fn reflect_101(coord: i64, len: u32) -> u32 {
    let len = len as i64;
    if len == 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let mut c = coord.rem_euclid(period);
    if c >= len {
        c = period - c;
    }
    c as u32
}

fn bilinear_sample(img: &Rgb32FImage, x: f32, y: f32) -> Rgb<f32> {
    let (width, height) = img.dimensions();

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let xs = [reflect_101(x0, width), reflect_101(x0 + 1, width)];
    let ys = [reflect_101(y0, height), reflect_101(y0 + 1, height)];

    let p00 = img.get_pixel(xs[0], ys[0]);
    let p10 = img.get_pixel(xs[1], ys[0]);
    let p01 = img.get_pixel(xs[0], ys[1]);
    let p11 = img.get_pixel(xs[1], ys[1]);

    let mut result = [0.0f32; 3];
    for c in 0..3 {
        result[c] = p00[c] * (1.0 - fx) * (1.0 - fy)
            + p10[c] * fx * (1.0 - fy)
            + p01[c] * (1.0 - fx) * fy
            + p11[c] * fx * fy;
    }
    Rgb(result)
}

/// Rotate by `angle_degrees` (counter-clockwise) and scale around the center,
/// then shift by `dx`, `dy` fractions of the image size. Borders reflect.
fn shift_scale_rotate(
    img: &Rgb32FImage,
    angle_degrees: f32,
    scale: f32,
    dx: f32,
    dy: f32,
) -> Rgb32FImage {
    let (width, height) = img.dimensions();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;

    let angle = angle_degrees.to_radians();
    let a = scale * angle.cos();
    let b = scale * angle.sin();
    let tx = (1.0 - a) * cx - b * cy + dx * width as f32;
    let ty = b * cx + (1.0 - a) * cy + dy * height as f32;

    // Inverse of [[a, b], [-b, a]]
    let det = a * a + b * b;
    let mut output = Rgb32FImage::new(width, height);
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let u = x as f32 - tx;
        let v = y as f32 - ty;
        let src_x = (a * u - b * v) / det;
        let src_y = (b * u + a * v) / det;
        *pixel = bilinear_sample(img, src_x, src_y);
    }
    output
}

fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let sat = if max == 0.0 { 0.0 } else { delta / max };
    (hue, sat, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let c = v * s;
    let hp = h / 60.0;
    let x = c * (1.0 - (hp.rem_euclid(2.0) - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    (r + m, g + m, b + m)
}

fn shift_hsv(mut img: Rgb32FImage, hue_shift: f32, sat_shift: f32, val_shift: f32) -> Rgb32FImage {
    for pixel in img.pixels_mut() {
        let (h, s, v) = rgb_to_hsv(pixel[0], pixel[1], pixel[2]);
        let h = (h + hue_shift).rem_euclid(360.0);
        let s = (s + sat_shift).clamp(0.0, 1.0);
        let v = (v + val_shift).clamp(0.0, 1.0);
        let (r, g, b) = hsv_to_rgb(h, s, v);
        *pixel = Rgb([r, g, b]);
    }
    img
}

fn brightness_contrast(mut img: Rgb32FImage, alpha: f32, beta: f32) -> Rgb32FImage {
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            pixel[c] = (pixel[c] * alpha + beta).clamp(0.0, 1.0);
        }
    }
    img
}

fn normalize(mut img: Rgb32FImage, mean: [f32; 3], std: [f32; 3]) -> Rgb32FImage {
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            pixel[c] = (pixel[c] - mean[c]) / std[c];
        }
    }
    img
}

fn fill_rect(img: &mut Rgb32FImage, x1: u32, y1: u32, x2: u32, y2: u32, value: f32) {
    for y in y1..y2 {
        for x in x1..x2 {
            img.put_pixel(x, y, Rgb([value; 3]));
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn coarse_dropout<R: Rng + ?Sized>(
    mut img: Rgb32FImage,
    min_holes: usize,
    max_holes: usize,
    hole_height: u32,
    hole_width: u32,
    fill_value: f32,
    rng: &mut R,
) -> Rgb32FImage {
    let (width, height) = img.dimensions();
    let hole_height = hole_height.min(height);
    let hole_width = hole_width.min(width);
    let holes = rng.gen_range(min_holes..=max_holes.max(min_holes));

    for _ in 0..holes {
        let y1 = rng.gen_range(0..=height - hole_height);
        let x1 = rng.gen_range(0..=width - hole_width);
        fill_rect(&mut img, x1, y1, x1 + hole_width, y1 + hole_height, fill_value);
    }
    img
}

fn cutout<R: Rng + ?Sized>(
    mut img: Rgb32FImage,
    num_holes: usize,
    hole_size: u32,
    fill_value: f32,
    rng: &mut R,
) -> Rgb32FImage {
    let (width, height) = img.dimensions();

    for _ in 0..num_holes {
        let y = rng.gen_range(0..height);
        let x = rng.gen_range(0..width);
        let y1 = y.saturating_sub(hole_size / 2);
        let x1 = x.saturating_sub(hole_size / 2);
        let y2 = (y1 + hole_size).min(height);
        let x2 = (x1 + hole_size).min(width);
        fill_rect(&mut img, x1, y1, x2, y2, fill_value);
    }
    img
}
