//! Colour segmentation on the rectified frame.

use opencv::{
    core::{self, Mat, Point, Scalar, Size, Vector},
    imgproc,
    prelude::*,
};

use crate::config::{BallConfig, Config, HsvRange, PlayersConfig};
use crate::detection::{Blob, Detection, PlayerDetection};
use crate::error::Error;

type Contours = Vector<Vector<Point>>;

#[inline]
fn lower_bound(range: &HsvRange) -> Scalar {
    let [h, s, v] = range.lower;
    Scalar::new(h as f64, s as f64, v as f64, 0.0)
}

#[inline]
fn upper_bound(range: &HsvRange) -> Scalar {
    let [h, s, v] = range.upper;
    Scalar::new(h as f64, s as f64, v as f64, 0.0)
}

/// Blurred HSV copy of a BGR frame.
pub fn to_hsv(bgr: &Mat, blur_kernel: i32) -> Result<Mat, Error> {
    let mut blurred = Mat::default();
    imgproc::gaussian_blur(
        bgr,
        &mut blurred,
        Size::new(blur_kernel, blur_kernel),
        0.0,
        0.0,
        core::BORDER_DEFAULT,
    )?;

    let mut hsv = Mat::default();
    imgproc::cvt_color(&blurred, &mut hsv, imgproc::COLOR_BGR2HSV, 0)?;

    Ok(hsv)
}

/// Binary mask of the pixels falling in any of `ranges`, opened with
/// `iterations` rounds of erosion followed by as many dilations.
pub struct ColorMask {
    ranges: Vec<HsvRange>,
    iterations: i32,
    kernel: Mat,
}

impl ColorMask {
    pub fn new(ranges: Vec<HsvRange>, iterations: i32) -> Result<Self, Error> {
        let kernel = imgproc::get_structuring_element(
            imgproc::MORPH_RECT,
            Size::new(3, 3),
            Point::new(-1, -1),
        )?;

        Ok(Self {
            ranges,
            iterations,
            kernel,
        })
    }

    pub fn apply(&self, hsv: &Mat) -> Result<Mat, Error> {
        let mut mask = Mat::default();

        for (idx, range) in self.ranges.iter().enumerate() {
            let mut part = Mat::default();
            core::in_range(hsv, &lower_bound(range), &upper_bound(range), &mut part)?;

            if idx == 0 {
                mask = part;
            } else {
                let mut merged = Mat::default();
                core::bitwise_or(&mask, &part, &mut merged, &core::no_array())?;
                mask = merged;
            }
        }

        if self.iterations > 0 {
            let border = imgproc::morphology_default_border_value()?;

            let mut eroded = Mat::default();
            imgproc::erode(
                &mask,
                &mut eroded,
                &self.kernel,
                Point::new(-1, -1),
                self.iterations,
                core::BORDER_CONSTANT,
                border,
            )?;

            imgproc::dilate(
                &eroded,
                &mut mask,
                &self.kernel,
                Point::new(-1, -1),
                self.iterations,
                core::BORDER_CONSTANT,
                border,
            )?;
        }

        Ok(mask)
    }
}

fn external_contours(mask: &Mat) -> Result<Contours, Error> {
    let mut contours = Contours::new();
    imgproc::find_contours(
        mask,
        &mut contours,
        imgproc::RETR_EXTERNAL,
        imgproc::CHAIN_APPROX_SIMPLE,
        Point::new(0, 0),
    )?;

    Ok(contours)
}

/// Finds the ball as the largest blob of ball colour.
pub struct BallDetector {
    blur_kernel: i32,
    mask: ColorMask,
    last_mask: Mat,
}

impl BallDetector {
    pub fn new(config: &BallConfig) -> Result<Self, Error> {
        Ok(Self {
            blur_kernel: config.blur_kernel,
            mask: ColorMask::new(vec![config.hsv], config.morph_iterations)?,
            last_mask: Mat::default(),
        })
    }

    /// Centroid of the largest external contour in the colour mask.
    pub fn detect(&mut self, frame: &Mat) -> Result<Option<Detection>, Error> {
        let hsv = to_hsv(frame, self.blur_kernel)?;
        self.last_mask = self.mask.apply(&hsv)?;

        let contours = external_contours(&self.last_mask)?;

        let mut best: Option<(f64, usize)> = None;
        for (idx, contour) in contours.iter().enumerate() {
            let area = imgproc::contour_area(&contour, false)?;

            if best.map_or(true, |(a, _)| area > a) {
                best = Some((area, idx));
            }
        }

        let (area, idx) = match best {
            Some(b) => b,
            None => return Ok(None),
        };

        let contour = contours.get(idx)?;
        let m = imgproc::moments(&contour, false)?;

        if m.m00 <= 0.0 {
            log::trace!("degenerate ball contour with {} points", contour.len());
            return Ok(None);
        }

        Ok(Some(Detection {
            x: (m.m10 / m.m00) as f32,
            y: (m.m01 / m.m00) as f32,
            area: area as f32,
        }))
    }

    /// Mask produced by the latest `detect` call.
    #[inline]
    pub fn mask(&self) -> &Mat {
        &self.last_mask
    }
}

/// Locates the figures of both teams on their rods. Diagnostics only.
pub struct PlayerDetector {
    blur_kernel: i32,
    red: ColorMask,
    blue: ColorMask,
    red_rods: Vec<(u8, f32)>,
    blue_rods: Vec<(u8, f32)>,
    field_height: f32,
    row_margin: f32,
    min_height: f32,
}

impl PlayerDetector {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let PlayersConfig {
            red,
            blue,
            red_rows,
            blue_rows,
            morph_iterations,
            row_margin,
            min_player_height,
            ..
        } = &config.players;

        let rods = |rows: &[u8]| -> Vec<(u8, f32)> {
            rows.iter()
                .filter_map(|&idx| config.row(idx).map(|r| (idx, r.x)))
                .collect()
        };

        Ok(Self {
            blur_kernel: config.ball.blur_kernel,
            red: ColorMask::new(red.clone(), *morph_iterations)?,
            blue: ColorMask::new(blue.clone(), *morph_iterations)?,
            red_rods: rods(red_rows),
            blue_rods: rods(blue_rows),
            field_height: config.table.height(),
            row_margin: *row_margin,
            min_height: *min_player_height,
        })
    }

    pub fn detect(&self, frame: &Mat) -> Result<Vec<PlayerDetection>, Error> {
        let hsv = to_hsv(frame, self.blur_kernel)?;
        let mut players = Vec::new();

        for (mask, rods) in [(&self.red, &self.red_rods), (&self.blue, &self.blue_rods)] {
            let mask = mask.apply(&hsv)?;

            for contour in external_contours(&mask)?.iter() {
                let r = imgproc::bounding_rect(&contour)?;
                let blob = Blob {
                    x: r.x as f32,
                    y: r.y as f32,
                    w: r.width as f32,
                    h: r.height as f32,
                };

                if let Some(p) =
                    blob.to_player(rods, self.field_height, self.row_margin, self.min_height)
                {
                    players.push(p);
                }
            }
        }

        log::trace!("{} players located", players.len());

        Ok(players)
    }
}
