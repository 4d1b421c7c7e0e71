//! Table corner tracking and perspective rectification.
//!
//! Four fiducial markers (ids 0..=3) sit near the table corners, clockwise from
//! top-left. Whenever all four are visible in one frame the corner estimate is
//! replaced; otherwise the last good estimate (or the configured default) keeps
//! being used.

use nalgebra as na;
use opencv::{
    core::{self, Mat, Point2f, Scalar, Size, Vector},
    imgproc,
    objdetect::{self, PredefinedDictionaryType},
    prelude::*,
};

use crate::config::{Config, MarkerDictionary};
use crate::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerObservation {
    pub id: i32,
    /// Marker polygon in raw image pixels, detector order
    pub corners: [na::Point2<f32>; 4],
}

pub trait MarkerDetector {
    fn detect(&mut self, image: &Mat) -> Result<Vec<MarkerObservation>, Error>;
}

pub struct ArucoMarkerDetector {
    detector: objdetect::ArucoDetector,
}

impl ArucoMarkerDetector {
    pub fn new(dictionary: MarkerDictionary) -> Result<Self, Error> {
        let kind = match dictionary {
            MarkerDictionary::Dict4x4_50 => PredefinedDictionaryType::DICT_4X4_50,
            MarkerDictionary::Dict4x4_100 => PredefinedDictionaryType::DICT_4X4_100,
            MarkerDictionary::Dict4x4_250 => PredefinedDictionaryType::DICT_4X4_250,
        };

        let dictionary = objdetect::get_predefined_dictionary(kind)?;
        let params = objdetect::DetectorParameters::default()?;
        let refine = objdetect::RefineParameters::new(10.0, 3.0, true)?;

        Ok(Self {
            detector: objdetect::ArucoDetector::new(&dictionary, &params, refine)?,
        })
    }
}

impl MarkerDetector for ArucoMarkerDetector {
    fn detect(&mut self, image: &Mat) -> Result<Vec<MarkerObservation>, Error> {
        let mut gray = Mat::default();
        if image.channels() == 1 {
            image.copy_to(&mut gray)?;
        } else {
            imgproc::cvt_color(image, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
        }

        let mut quads = Vector::<Vector<Point2f>>::new();
        let mut ids = Vector::<i32>::new();
        let mut rejected = Vector::<Vector<Point2f>>::new();
        self.detector
            .detect_markers(&gray, &mut quads, &mut ids, &mut rejected)?;

        let mut markers = Vec::with_capacity(ids.len());
        for (id, quad) in ids.iter().zip(quads.iter()) {
            if quad.len() != 4 {
                continue;
            }

            let mut corners = [na::Point2::origin(); 4];
            for (dst, p) in corners.iter_mut().zip(quad.iter()) {
                *dst = na::Point2::new(p.x, p.y);
            }

            markers.push(MarkerObservation { id, corners });
        }

        log::trace!("{} markers detected", markers.len());

        Ok(markers)
    }
}

/// Current table corner estimate (tl, tr, br, bl) in raw pixels, and the
/// rectified output size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationFrame {
    pub corners: [na::Point2<f32>; 4],
    pub width: i32,
    pub height: i32,
}

impl CalibrationFrame {
    /// Canonical output rectangle the corners are mapped onto.
    pub fn destination(&self) -> [na::Point2<f32>; 4] {
        let (w, h) = ((self.width - 1) as f32, (self.height - 1) as f32);

        [
            na::Point2::new(0.0, 0.0),
            na::Point2::new(w, 0.0),
            na::Point2::new(w, h),
            na::Point2::new(0.0, h),
        ]
    }

    fn transform(&self) -> Result<Mat, Error> {
        let to_cv = |p: &na::Point2<f32>| Point2f::new(p.x, p.y);

        let src: Vector<Point2f> = self.corners.iter().map(to_cv).collect();
        let dst: Vector<Point2f> = self.destination().iter().map(to_cv).collect();

        Ok(imgproc::get_perspective_transform(&src, &dst, core::DECOMP_LU)?)
    }
}

pub struct TableCalibrator<M = ArucoMarkerDetector> {
    detector: M,
    frame: CalibrationFrame,
    offsets: [na::Vector2<f32>; 4],
    reference_corner: usize,
    transform: Mat,
}

impl<M: MarkerDetector> TableCalibrator<M> {
    pub fn new(config: &Config, detector: M) -> Result<Self, Error> {
        let cal = &config.calibration;

        let frame = CalibrationFrame {
            corners: cal.default_corners(),
            width: config.table.width_px as i32,
            height: config.table.height_px as i32,
        };

        Ok(Self {
            detector,
            transform: frame.transform()?,
            frame,
            offsets: [0, 1, 2, 3].map(|id| cal.marker_offset(id)),
            reference_corner: cal.reference_corner,
        })
    }

    #[inline]
    pub fn frame(&self) -> &CalibrationFrame {
        &self.frame
    }

    /// Replaces the corners if markers 0..=3 are all present. Returns whether
    /// they were.
    pub fn apply_markers(&mut self, markers: &[MarkerObservation]) -> bool {
        let mut found: [Option<na::Point2<f32>>; 4] = [None; 4];

        for m in markers {
            let id = match usize::try_from(m.id) {
                Ok(id) if id < found.len() => id,
                _ => continue,
            };

            if found[id].is_none() {
                found[id] = Some(m.corners[self.reference_corner] + self.offsets[id]);
            }
        }

        match found {
            [Some(tl), Some(tr), Some(br), Some(bl)] => {
                let corners = [tl, tr, br, bl];

                if corners != self.frame.corners {
                    log::debug!("table corners moved to {:?}", corners);
                }

                self.frame.corners = corners;
                true
            }

            _ => {
                log::trace!(
                    "{} of 4 table markers visible, keeping corners",
                    found.iter().flatten().count()
                );
                false
            }
        }
    }

    /// Rectifies `raw` onto the canonical table rectangle.
    ///
    /// The flag tells whether this frame refreshed the corner estimate.
    pub fn calibrate(&mut self, raw: &Mat) -> Result<(Mat, bool), Error> {
        let markers = self.detector.detect(raw)?;

        let previous = self.frame.corners;
        let updated = self.apply_markers(&markers);

        if updated && previous != self.frame.corners {
            self.transform = self.frame.transform()?;
        }

        let mut rectified = Mat::default();
        imgproc::warp_perspective(
            raw,
            &mut rectified,
            &self.transform,
            Size::new(self.frame.width, self.frame.height),
            imgproc::INTER_LINEAR,
            core::BORDER_CONSTANT,
            Scalar::default(),
        )?;

        Ok((rectified, updated))
    }
}
