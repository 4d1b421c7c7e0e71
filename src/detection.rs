use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

/// Ball centroid found in one rectified frame, with the blob area it came from
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    #[serde(rename = "a")]
    pub area: f32,
}

impl Detection {
    #[inline(always)]
    pub fn center(&self) -> na::Point2<f32> {
        na::Point2::new(self.x, self.y)
    }
}

/// Axis-aligned bounding box of a mask blob, top-left origin
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Blob {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// A figure located on one of the rods
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PlayerDetection {
    pub row: u8,
    /// Rod x, the blob is snapped onto its rod
    pub x: f32,
    pub y: f32,
    pub blob: Blob,
}

impl Blob {
    /// Attaches the blob to the first rod it straddles.
    ///
    /// Blobs touching the bumper margin at either long wall, or shorter than
    /// `min_height`, are not players.
    pub fn to_player(
        &self,
        rods: &[(u8, f32)],
        field_height: f32,
        row_margin: f32,
        min_height: f32,
    ) -> Option<PlayerDetection> {
        if self.y < row_margin || self.y > field_height - row_margin {
            return None;
        }

        if self.h < min_height {
            return None;
        }

        let &(row, x) = rods
            .iter()
            .find(|(_, x)| self.x < *x && *x < self.x + self.w)?;

        Some(PlayerDetection {
            row,
            x,
            y: self.y + self.h / 2.0,
            blob: *self,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const RODS: [(u8, f32); 2] = [(0, 43.19), (1, 122.28)];

    fn blob(x: f32, y: f32, w: f32, h: f32) -> Blob {
        Blob { x, y, w, h }
    }

    #[test]
    fn blob_straddling_rod_is_player() {
        let p = blob(110.0, 100.0, 20.0, 30.0)
            .to_player(&RODS, 360.0, 17.0, 9.0)
            .unwrap();

        assert_eq!(p.row, 1);
        assert_abs_diff_eq!(p.x, 122.28);
        assert_abs_diff_eq!(p.y, 115.0);
    }

    #[test]
    fn bumper_blobs_are_rejected() {
        assert!(blob(30.0, 5.0, 20.0, 30.0)
            .to_player(&RODS, 360.0, 17.0, 9.0)
            .is_none());
        assert!(blob(30.0, 350.0, 20.0, 30.0)
            .to_player(&RODS, 360.0, 17.0, 9.0)
            .is_none());
    }

    #[test]
    fn short_or_off_rod_blobs_are_rejected() {
        assert!(blob(30.0, 100.0, 20.0, 5.0)
            .to_player(&RODS, 360.0, 17.0, 9.0)
            .is_none());
        assert!(blob(60.0, 100.0, 20.0, 30.0)
            .to_player(&RODS, 360.0, 17.0, 9.0)
            .is_none());
    }
}
